//! kgate core library: command policy, invocation builder, executor, intent classifier,
//! dispatcher, Mattermost channel, and the gateway run loop used by the CLI.

pub mod channels;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod gateway;
pub mod init;
pub mod intent;
pub mod policy;
