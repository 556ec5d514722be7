//! 数据模型模块

pub mod audit;
pub mod hierarchy;
pub mod permission;
pub mod role;
pub mod user;
