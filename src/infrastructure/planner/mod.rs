//! Planner adapters: the Anthropic HTTP client and a scripted stand-in.

pub mod anthropic;
pub mod scripted;

pub use anthropic::AnthropicPlanner;
pub use scripted::{ScriptedAnalyzer, ScriptedPlanner};
