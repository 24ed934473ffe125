//! relaydown: 基于消息总线的可暂停/续传下载管理器
//!
//! - [`messaging`]：消息信封、有界邮箱、进程内总线与 WebSocket 桥接
//! - [`core`]：下载注册中心与每个下载的工作线程
//! - [`config`] / [`cli`] / [`ui`] / [`utils`]：配置、命令行、终端前端与日志

pub mod cli;
pub mod config;
pub mod core;
pub mod messaging;
pub mod ui;
pub mod utils;
