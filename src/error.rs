//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 数据库触发器拒绝删除最后一位管理员时使用的 SQLSTATE
pub const LAST_ADMIN_TRIGGER_SQLSTATE: &str = "P0001";

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Entity has children: {0}")]
    HasChildren(String),

    #[error("{0}")]
    LastAdministrator(String),

    #[error("Users cannot delete their own account")]
    SelfDeletion,

    #[error("Permission references a missing entity: {0}")]
    OrphanedPermission(String),

    #[error("No active administrator exists and recovery failed")]
    CriticalState,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::SelfDeletion => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::HasChildren(_) | AppError::LastAdministrator(_) => {
                StatusCode::CONFLICT
            }
            AppError::CriticalState => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) if self.is_last_admin_trigger() => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::OrphanedPermission(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::NotFound => "Resource not found".to_string(),
            AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::HasChildren(msg)
            | AppError::LastAdministrator(msg) => msg.clone(),
            AppError::SelfDeletion => "You cannot delete your own account".to_string(),
            AppError::CriticalState => {
                "No active administrator exists; manual intervention is required".to_string()
            }
            AppError::Database(_) if self.is_last_admin_trigger() => {
                "Operation rejected: the user is the last active administrator".to_string()
            }
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::OrphanedPermission(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 是否为数据库层的最后管理员触发器拒绝
    pub fn is_last_admin_trigger(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(LAST_ADMIN_TRIGGER_SQLSTATE)
                    && db.message().contains("last active administrator")
            }
            _ => false,
        }
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else if self.is_last_admin_trigger() {
            tracing::error!(
                request_id = %error_response.error.request_id,
                "Last-administrator trigger rejected a write that bypassed the application check"
            );
        } else {
            tracing::debug!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 请求体验证失败
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Unauthorized.code(), 401);
        assert_eq!(AppError::Forbidden.code(), 403);
        assert_eq!(AppError::NotFound.code(), 404);
        assert_eq!(AppError::BadRequest("test".to_string()).code(), 400);
        assert_eq!(AppError::LastAdministrator("x".to_string()).code(), 409);
        assert_eq!(AppError::HasChildren("x".to_string()).code(), 409);
        assert_eq!(AppError::SelfDeletion.code(), 400);
        assert_eq!(AppError::CriticalState.code(), 503);
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let message = error.user_message();
        assert_eq!(message, "Database error occurred");
        assert!(!message.contains("sqlx"));
        assert!(!error.is_last_admin_trigger());

        let error = AppError::OrphanedPermission("sectors.view.9".to_string());
        assert_eq!(error.user_message(), "Internal server error");
    }

    #[test]
    fn test_protection_messages_are_distinct() {
        let last_admin = AppError::LastAdministrator(
            "Cannot delete \"root\": they are the last active administrator".to_string(),
        );
        assert!(last_admin.user_message().contains("last active administrator"));
        assert_ne!(last_admin.user_message(), AppError::SelfDeletion.user_message());
    }
}
