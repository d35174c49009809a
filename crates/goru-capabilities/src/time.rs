//! Always-available clock host function. No capability gate: every run
//! may ask what time it is.

use async_trait::async_trait;
use goru_registry::{HostContext, HostFn};
use goru_types::error::EngineResult;
use serde_json::{json, Value};
use std::collections::BTreeMap as ArgMap;

pub struct TimeNow;

#[async_trait]
impl HostFn for TimeNow {
    async fn call(&self, _ctx: &HostContext, _args: ArgMap<String, Value>) -> EngineResult<Value> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Ok(json!(now.as_secs_f64()))
    }
}
