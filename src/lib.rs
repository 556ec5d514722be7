//! 维护系统的层级授权服务
//! 厂区 → 区域 → 工段 → 设备 的作用域权限、授权解析与管理员保护

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
