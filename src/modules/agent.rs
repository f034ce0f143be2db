//! The check-in client itself: version and business-unit key.

use anyhow::Result;
use async_trait::async_trait;

use super::{CheckinModule, ModuleContext};
use crate::models::ModuleSection;

pub const SECTION: &str = "sal";
const VERSION: &str = "1.0.0";

#[derive(Debug, Default)]
pub struct AgentModule;

#[async_trait]
impl CheckinModule for AgentModule {
    fn name(&self) -> &'static str {
        SECTION
    }

    async fn collect(&self, ctx: &ModuleContext) -> Result<Option<ModuleSection>> {
        let server = ctx.prefs.server_prefs()?;

        let mut section = ModuleSection::new();
        section.facts.insert("checkin_module_version", VERSION);
        section.set("key", server.key);
        section.set("sal_version", env!("CARGO_PKG_VERSION"));
        Ok(Some(section))
    }
}
