//! The no-op output — exercises the plugin machinery without doing anything.

use crate::Output;

pub struct Noop;

impl Noop {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Noop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Output for Noop {
    async fn start(&self) -> anyhow::Result<()> {
        tracing::info!("noop output starting");
        Ok(())
    }

    async fn stop(&self) {
        tracing::info!("noop output stopping");
    }
}
