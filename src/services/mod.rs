//! Business logic services layer

pub mod admin_protection;
pub mod audit_service;
pub mod authorization;
pub mod catalog;
pub mod hierarchy_service;
pub mod role_service;
pub mod user_service;

pub use admin_protection::{AdminProtectionService, AdminState, OperationCheck, ProtectedOperation};
pub use audit_service::{AuditAction, AuditService};
pub use authorization::AuthorizationService;
pub use catalog::PermissionCatalog;
pub use hierarchy_service::HierarchyService;
pub use role_service::RoleService;
pub use user_service::UserService;
