//! Clan armory endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{armory::ArmoryEntryDetails, ArmoryEntry, CatalogEvent},
    services::{reconciler::PurgeReport, sweeper::SweepReport},
};

use super::{ActingUser, ServiceCaller};

/// Offer item request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OfferItemRequest {
    /// Item instance to put in the armory
    #[validate(range(min = 1, message = "Item instance id must be positive"))]
    pub item_instance_id: i64,
}

/// Offer response
#[derive(Serialize, ToSchema)]
pub struct OfferResponse {
    pub item_instance_id: i64,
    pub clan_id: i64,
    pub lender_user_id: i64,
    pub offered_at: DateTime<Utc>,
}

/// Loan response
#[derive(Serialize, ToSchema)]
pub struct LoanResponse {
    pub item_instance_id: i64,
    pub clan_id: i64,
    pub lender_user_id: i64,
    pub borrower_user_id: i64,
    /// Reclaim clock of the loan
    pub updated_at: DateTime<Utc>,
    /// Status message
    pub message: String,
}

impl LoanResponse {
    fn from_entry(entry: &ArmoryEntry, message: &str) -> AppResult<Self> {
        let loan = entry
            .loan()
            .ok_or_else(|| AppError::Internal("Expected a loaned armory entry".to_string()))?;

        Ok(Self {
            item_instance_id: entry.offer.item_instance_id,
            clan_id: entry.offer.lender_clan_id,
            lender_user_id: entry.offer.lender_user_id,
            borrower_user_id: loan.borrower_user_id,
            updated_at: loan.updated_at,
            message: message.to_string(),
        })
    }
}

/// List a clan's armory
#[utoipa::path(
    get,
    path = "/clans/{clan_id}/armory",
    tag = "armory",
    params(
        ("clan_id" = i64, Path, description = "Clan ID"),
        ("x-user-id" = i64, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Armory entries, most recently active first", body = Vec<ArmoryEntryDetails>),
        (status = 403, description = "Not a member of the clan")
    )
)]
pub async fn list_armory(
    State(state): State<crate::AppState>,
    ActingUser(user_id): ActingUser,
    Path(clan_id): Path<i64>,
) -> AppResult<Json<Vec<ArmoryEntryDetails>>> {
    let entries = state.services.lending.list_armory(user_id, clan_id).await?;
    Ok(Json(entries))
}

/// Offer an item to a clan's armory
#[utoipa::path(
    post,
    path = "/clans/{clan_id}/armory",
    tag = "armory",
    params(
        ("clan_id" = i64, Path, description = "Clan ID"),
        ("x-user-id" = i64, Header, description = "Acting user")
    ),
    request_body = OfferItemRequest,
    responses(
        (status = 201, description = "Item offered", body = OfferResponse),
        (status = 403, description = "Not a clan member or not the item owner"),
        (status = 409, description = "Item already offered"),
        (status = 422, description = "Item type disabled or offer limit reached")
    )
)]
pub async fn offer_item(
    State(state): State<crate::AppState>,
    ActingUser(user_id): ActingUser,
    Path(clan_id): Path<i64>,
    Json(request): Json<OfferItemRequest>,
) -> AppResult<(StatusCode, Json<OfferResponse>)> {
    request
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let offer = state
        .services
        .lending
        .offer_item(user_id, clan_id, request.item_instance_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OfferResponse {
            item_instance_id: offer.item_instance_id,
            clan_id: offer.lender_clan_id,
            lender_user_id: offer.lender_user_id,
            offered_at: offer.updated_at,
        }),
    ))
}

/// Withdraw an offer from the armory
#[utoipa::path(
    delete,
    path = "/armory/{item_instance_id}",
    tag = "armory",
    params(
        ("item_instance_id" = i64, Path, description = "Item instance ID"),
        ("x-user-id" = i64, Header, description = "Acting user")
    ),
    responses(
        (status = 204, description = "Offer withdrawn"),
        (status = 403, description = "Not the lender"),
        (status = 404, description = "No such offer"),
        (status = 409, description = "Item is on loan")
    )
)]
pub async fn withdraw_offer(
    State(state): State<crate::AppState>,
    ActingUser(user_id): ActingUser,
    Path(item_instance_id): Path<i64>,
) -> AppResult<StatusCode> {
    state
        .services
        .lending
        .withdraw_offer(user_id, item_instance_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Borrow an item from a clan's armory
#[utoipa::path(
    post,
    path = "/clans/{clan_id}/armory/{item_instance_id}/borrow",
    tag = "armory",
    params(
        ("clan_id" = i64, Path, description = "Clan ID"),
        ("item_instance_id" = i64, Path, description = "Item instance ID"),
        ("x-user-id" = i64, Header, description = "Acting user")
    ),
    responses(
        (status = 201, description = "Item borrowed", body = LoanResponse),
        (status = 403, description = "Not a clan member, or the offer belongs to another clan"),
        (status = 404, description = "No such offer"),
        (status = 409, description = "Item already on loan"),
        (status = 422, description = "Lender cannot borrow their own item")
    )
)]
pub async fn borrow_item(
    State(state): State<crate::AppState>,
    ActingUser(user_id): ActingUser,
    Path((clan_id, item_instance_id)): Path<(i64, i64)>,
) -> AppResult<(StatusCode, Json<LoanResponse>)> {
    let entry = state
        .services
        .lending
        .borrow_item(user_id, clan_id, item_instance_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(LoanResponse::from_entry(&entry, "Item borrowed successfully")?),
    ))
}

/// Return a borrowed item
#[utoipa::path(
    post,
    path = "/armory/{item_instance_id}/return",
    tag = "armory",
    params(
        ("item_instance_id" = i64, Path, description = "Item instance ID"),
        ("x-user-id" = i64, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Item returned", body = LoanResponse),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "No active loan")
    )
)]
pub async fn return_item(
    State(state): State<crate::AppState>,
    ActingUser(user_id): ActingUser,
    Path(item_instance_id): Path<i64>,
) -> AppResult<Json<LoanResponse>> {
    let entry = state
        .services
        .lending
        .return_item(user_id, item_instance_id)
        .await?;

    Ok(Json(LoanResponse::from_entry(&entry, "Item returned")?))
}

/// Record loan activity, restarting the reclaim clock
#[utoipa::path(
    post,
    path = "/armory/{item_instance_id}/touch",
    tag = "armory",
    params(
        ("item_instance_id" = i64, Path, description = "Item instance ID"),
        ("x-user-id" = i64, Header, description = "Acting user")
    ),
    responses(
        (status = 200, description = "Loan refreshed", body = LoanResponse),
        (status = 403, description = "Not the borrower"),
        (status = 404, description = "No active loan")
    )
)]
pub async fn touch_loan(
    State(state): State<crate::AppState>,
    ActingUser(user_id): ActingUser,
    Path(item_instance_id): Path<i64>,
) -> AppResult<Json<LoanResponse>> {
    let entry = state
        .services
        .lending
        .touch_loan(user_id, item_instance_id)
        .await?;

    Ok(Json(LoanResponse::from_entry(&entry, "Loan refreshed")?))
}

/// Disable an item type and purge it from every armory
#[utoipa::path(
    post,
    path = "/item-types/{item_type_id}/disable",
    tag = "armory",
    params(
        ("item_type_id" = i64, Path, description = "Item type ID"),
        ("x-internal-token" = String, Header, description = "Service token")
    ),
    responses(
        (status = 200, description = "Item type disabled", body = PurgeReport),
        (status = 401, description = "Missing or invalid service token"),
        (status = 404, description = "No such item type")
    )
)]
pub async fn disable_item_type(
    State(state): State<crate::AppState>,
    _caller: ServiceCaller,
    Path(item_type_id): Path<i64>,
) -> AppResult<Json<PurgeReport>> {
    let report = state
        .services
        .reconciler
        .handle(CatalogEvent::ItemTypeDisabled { item_type_id })
        .await?
        .ok_or_else(|| AppError::Internal("Disable event produced no report".to_string()))?;

    Ok(Json(report))
}

/// Run one reclaim sweep now
#[utoipa::path(
    post,
    path = "/armory/sweep",
    tag = "armory",
    params(
        ("x-internal-token" = String, Header, description = "Service token")
    ),
    responses(
        (status = 200, description = "Sweep completed", body = SweepReport),
        (status = 401, description = "Missing or invalid service token")
    )
)]
pub async fn run_sweep(
    State(state): State<crate::AppState>,
    _caller: ServiceCaller,
) -> Json<SweepReport> {
    Json(state.services.sweeper.sweep_once().await)
}

/// Purge response
#[derive(Serialize, ToSchema)]
pub struct MemberPurgeResponse {
    pub clan_id: i64,
    pub user_id: i64,
    /// Offers removed and loans ended
    pub entries_affected: usize,
}

/// Drop a departed member's offers and loans from a clan's armory
#[utoipa::path(
    delete,
    path = "/clans/{clan_id}/members/{user_id}/armory",
    tag = "armory",
    params(
        ("clan_id" = i64, Path, description = "Clan ID"),
        ("user_id" = i64, Path, description = "Departed member"),
        ("x-user-id" = i64, Header, description = "Acting officer or leader")
    ),
    responses(
        (status = 200, description = "Member purged from the armory", body = MemberPurgeResponse),
        (status = 403, description = "Not an officer or leader of the clan")
    )
)]
pub async fn purge_member(
    State(state): State<crate::AppState>,
    ActingUser(acting_user_id): ActingUser,
    Path((clan_id, user_id)): Path<(i64, i64)>,
) -> AppResult<Json<MemberPurgeResponse>> {
    let affected = state
        .services
        .lending
        .purge_member(acting_user_id, clan_id, user_id)
        .await?;

    Ok(Json(MemberPurgeResponse {
        clan_id,
        user_id,
        entries_affected: affected.len(),
    }))
}
