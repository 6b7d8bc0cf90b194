//! Service layer: the moving parts of the orchestrator.

pub mod agent_controller;
pub mod executor;
pub mod intake;
pub mod memory_governor;
pub mod objective;
pub mod orchestrator;
pub mod registry;
pub mod runtime_governor;
pub mod supervisor;

pub use agent_controller::{AgentController, AgentControllerConfig, AgentPhase};
pub use executor::ProcessExecutor;
pub use intake::{parse_task_file, TaskIntake};
pub use memory_governor::{MemoryGovernor, MemoryPressure, WorkPermit};
pub use objective::{load_objective_file, ObjectiveService};
pub use orchestrator::{ObjectiveMode, Orchestrator};
pub use registry::{RegistryFile, RegistryWriter};
pub use runtime_governor::{EndState, RuntimeGovernor, RuntimeSnapshot};
pub use supervisor::{AgentDirectory, FixedAgentDirectory, SupervisorConfig, SupervisorReconciler};
