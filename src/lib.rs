//! Observe 查询 MCP 工具核心库
//! 传输、模式探测、查询合成、提交与游标分页分模块实现。

pub mod config;
pub mod error;
pub mod model;
pub mod client;
pub mod schema;
pub mod synth;
pub mod export;
pub mod tools;
pub mod http;
pub mod mcp;
