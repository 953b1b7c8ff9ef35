pub mod bridge;
pub mod commands;
pub mod connection;
pub mod id_map;
pub mod output;
pub mod publish;
pub mod shelly;
pub mod topic;
