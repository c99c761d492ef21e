//! Error types for the clan armory

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::{ClanId, ItemInstanceId, UserId};

/// Numeric error codes returned in response bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NotClanMember = 4,
    NotItemOwner = 5,
    NotLender = 6,
    NotBorrower = 7,
    OfferNotFound = 8,
    LoanNotFound = 9,
    AlreadyOffered = 10,
    AlreadyLoaned = 11,
    CrossClanBorrow = 12,
    SelfLoan = 13,
    CurrentlyLoaned = 14,
    ItemTypeDisabled = 15,
    OfferLimitReached = 16,
    NoSuchData = 17,
    BadValue = 18,
    InsufficientRole = 19,
}

/// Request rejections raised by armory rules.
///
/// None of these are retried by the lending service; the caller decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArmoryError {
    #[error("User {user_id} is not an active member of clan {clan_id}")]
    NotClanMember { user_id: UserId, clan_id: ClanId },

    #[error("User {user_id} is not an officer of clan {clan_id}")]
    InsufficientRole { user_id: UserId, clan_id: ClanId },

    #[error("User {user_id} does not own item {item_instance_id}")]
    NotItemOwner {
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    },

    #[error("User {user_id} is not the lender of item {item_instance_id}")]
    NotLender {
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    },

    #[error("User {user_id} is not the borrower of item {item_instance_id}")]
    NotBorrower {
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    },

    #[error("No armory offer for item {0}")]
    OfferNotFound(ItemInstanceId),

    #[error("No active loan for item {0}")]
    LoanNotFound(ItemInstanceId),

    #[error("Item {0} is already offered")]
    AlreadyOffered(ItemInstanceId),

    #[error("Item {0} is already on loan")]
    AlreadyLoaned(ItemInstanceId),

    #[error("Item {item_instance_id} belongs to the armory of clan {lender_clan_id}, not clan {borrower_clan_id}")]
    CrossClanBorrow {
        item_instance_id: ItemInstanceId,
        lender_clan_id: ClanId,
        borrower_clan_id: ClanId,
    },

    #[error("User {user_id} cannot borrow their own item {item_instance_id}")]
    SelfLoan {
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    },

    #[error("Item {0} is currently on loan and cannot be withdrawn")]
    CurrentlyLoaned(ItemInstanceId),

    #[error("Item {0} is of a disabled item type")]
    ItemTypeDisabled(ItemInstanceId),

    #[error("User {user_id} already has {limit} items in the armory")]
    OfferLimitReached { user_id: UserId, limit: usize },
}

impl ArmoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ArmoryError::NotClanMember { .. } => ErrorCode::NotClanMember,
            ArmoryError::InsufficientRole { .. } => ErrorCode::InsufficientRole,
            ArmoryError::NotItemOwner { .. } => ErrorCode::NotItemOwner,
            ArmoryError::NotLender { .. } => ErrorCode::NotLender,
            ArmoryError::NotBorrower { .. } => ErrorCode::NotBorrower,
            ArmoryError::OfferNotFound(_) => ErrorCode::OfferNotFound,
            ArmoryError::LoanNotFound(_) => ErrorCode::LoanNotFound,
            ArmoryError::AlreadyOffered(_) => ErrorCode::AlreadyOffered,
            ArmoryError::AlreadyLoaned(_) => ErrorCode::AlreadyLoaned,
            ArmoryError::CrossClanBorrow { .. } => ErrorCode::CrossClanBorrow,
            ArmoryError::SelfLoan { .. } => ErrorCode::SelfLoan,
            ArmoryError::CurrentlyLoaned(_) => ErrorCode::CurrentlyLoaned,
            ArmoryError::ItemTypeDisabled(_) => ErrorCode::ItemTypeDisabled,
            ArmoryError::OfferLimitReached { .. } => ErrorCode::OfferLimitReached,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ArmoryError::NotClanMember { .. }
            | ArmoryError::InsufficientRole { .. }
            | ArmoryError::NotItemOwner { .. }
            | ArmoryError::NotLender { .. }
            | ArmoryError::NotBorrower { .. }
            | ArmoryError::CrossClanBorrow { .. } => StatusCode::FORBIDDEN,
            ArmoryError::OfferNotFound(_) | ArmoryError::LoanNotFound(_) => StatusCode::NOT_FOUND,
            ArmoryError::AlreadyOffered(_)
            | ArmoryError::AlreadyLoaned(_)
            | ArmoryError::CurrentlyLoaned(_) => StatusCode::CONFLICT,
            ArmoryError::SelfLoan { .. }
            | ArmoryError::ItemTypeDisabled(_)
            | ArmoryError::OfferLimitReached { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Armory(#[from] ArmoryError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Rule rejection carried by this error, if any
    pub fn armory(&self) -> Option<&ArmoryError> {
        match self {
            AppError::Armory(e) => Some(e),
            _ => None,
        }
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Armory(e) => (e.status(), e.code(), e.to_string()),
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Config(e) => {
                tracing::error!("Configuration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
