//! Scene execution collaborator

use async_trait::async_trait;
use log::info;

use crate::core::bluetooth::commands::PlejdCommand;
use crate::error::Result;

/// Options of a turn-on request
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TurnOnOptions {
    /// Target level, `None` restores the previous level
    pub brightness: Option<u8>,
    /// Transition time in seconds
    pub transition: f64,
}

/// Light operations a scene may use
pub trait LightControl: Send + Sync {
    fn turn_on(&self, device_id: u8, options: TurnOnOptions) -> Result<()>;

    fn turn_off(&self, device_id: u8, transition: f64) -> Result<()>;

    /// Queues a raw mesh command
    fn send_command(&self, command: PlejdCommand);
}

/// Runs a scene when `trigger_scene` is called
#[async_trait]
pub trait SceneExecutor: Send + Sync {
    async fn execute_scene(&self, scene_id: u8, lights: &dyn LightControl) -> Result<()>;
}

/// Lets the mesh run the scene it has stored by broadcasting its trigger
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshSceneExecutor;

#[async_trait]
impl SceneExecutor for MeshSceneExecutor {
    async fn execute_scene(&self, scene_id: u8, lights: &dyn LightControl) -> Result<()> {
        info!("Triggering scene {} on the mesh", scene_id);
        lights.send_command(PlejdCommand::Scene { scene_id });
        Ok(())
    }
}
