//! Heartbeat: the smallest useful Caravel plugin. Logs a liveness line with
//! the hosted client's world and revision once every few seconds. Doubles as
//! a worked example of the SDK surface.

use std::time::Duration;

use anyhow::Result;
use caravel_plugin_sdk::prelude::*;

const BEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct HeartbeatPlugin {
    beats: u64,
}

impl Plugin for HeartbeatPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }

    fn create_control(&self) -> Result<ControlEntry> {
        Ok(ControlEntry::new("Heartbeat"))
    }

    fn tick(&mut self, client: &ClientHandle) -> Result<Cadence> {
        self.beats += 1;
        log::info!(
            "heartbeat {}: world {}, revision {}",
            self.beats,
            client.world(),
            client
                .revision()
                .map_or_else(|| "unknown".to_string(), |revision| revision.to_string())
        );
        Ok(Cadence::After(BEAT_INTERVAL))
    }
}

pub struct HeartbeatFactory;

impl PluginFactory for HeartbeatFactory {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }

    fn create(&self) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(HeartbeatPlugin::default()))
    }
}

fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        id: "heartbeat".to_string(),
        name: "Heartbeat".to_string(),
        vendor: Some("Caravel".to_string()),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    }
}

declare_caravel_plugins!(HeartbeatFactory);
