//! Sources feeding parsed actions into the agent.

pub mod plugins;
