//! HTTP request adapter: validates inbound requests, invokes the apply
//! coordinator or the store reads, and shapes responses. Business rejections
//! from playback become structured 422 bodies carrying the pre-apply state;
//! everything else non-4xx is a plain `{error}` server error.

use std::time::Duration;

use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::{self, Json};
use rocket::{Request, Route, State, get, post, routes};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::apply::{self, ApplyCommand, ApplyOutcome};
use crate::deadline::Deadline;
use crate::error::{ApplyError, StoreError};
use crate::lock::AccountLocks;
use crate::model::{Account, OperationDraft, OperationKind, Transaction};
use crate::store::{self, TransactionWithOperations};

const CREATE_ACCOUNT_BUDGET: Duration = Duration::from_millis(100);
const EXECUTE_OPERATIONS_BUDGET: Duration = Duration::from_millis(2000);
const READ_BUDGET: Duration = Duration::from_millis(500);
const HEALTH_CHECK_BUDGET: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

/// A plain `{error}` response with an explicit status code.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: Status,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: Status::BadRequest,
            message: message.into(),
        }
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: Status::UnprocessableEntity,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: Status::InternalServerError,
            message: message.into(),
        }
    }

    fn decode(error: &json::Error<'_>) -> Self {
        let detail = match error {
            json::Error::Io(io) => io.to_string(),
            json::Error::Parse(_, parse) => parse.to_string(),
        };
        Self::unprocessable(format!("error decoding request body: {detail}"))
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .respond_to(request)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!("store error: {err}");
        Self::internal(format!("error executing database operations: {err}"))
    }
}

impl From<ApplyError> for ApiError {
    fn from(err: ApplyError) -> Self {
        error!("apply error: {err}");
        Self::internal(err.to_string())
    }
}

fn begin_error(err: sqlx::Error) -> ApiError {
    error!("error beginning transaction: {err}");
    ApiError::internal(format!("error beginning transaction: {err}"))
}

fn commit_error(err: sqlx::Error) -> ApiError {
    error!("error committing database state: {err}");
    ApiError::internal(format!("error committing database state: {err}"))
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateAccountRequest {
    user_ari: String,
}

#[post("/create_account", format = "json", data = "<request>")]
async fn create_account(
    request: Result<Json<CreateAccountRequest>, json::Error<'_>>,
    pool: &State<SqlitePool>,
) -> Result<Json<Account>, ApiError> {
    let request = request.map_err(|e| ApiError::decode(&e))?.into_inner();
    if request.user_ari.is_empty() {
        return Err(ApiError::bad_request("error missing required fields"));
    }

    let deadline = Deadline::after(CREATE_ACCOUNT_BUDGET);
    let mut sql_tx = pool.begin().await.map_err(begin_error)?;
    let account = store::create_account(&mut sql_tx, deadline, &request.user_ari).await?;
    sql_tx.commit().await.map_err(commit_error)?;

    info!(
        account_id = account.account_id,
        user_ari = %account.user_ari,
        "account created"
    );
    Ok(Json(account))
}

#[derive(Debug, Serialize, Deserialize)]
struct OperationRequest {
    #[serde(default)]
    operation_type: String,
    #[serde(default)]
    amount_in_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExecuteOperationsRequest {
    #[serde(default)]
    account_id: i64,
    #[serde(default)]
    tenant: String,
    /// Zero opens a new transaction; a positive id appends to an existing
    /// one.
    #[serde(default)]
    transaction_id: i64,
    #[serde(default)]
    operations: Vec<OperationRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppliedBody {
    account: Account,
    transaction: Transaction,
}

#[derive(Debug, Serialize, Deserialize)]
struct RejectedBody {
    error: String,
    account: Account,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction: Option<Transaction>,
}

#[derive(rocket::Responder)]
enum ExecuteOperationsResponse {
    #[response(status = 200)]
    Applied(Json<AppliedBody>),
    #[response(status = 422)]
    Rejected(Json<RejectedBody>),
}

fn validate_operations(
    operations: &[OperationRequest],
) -> Result<Vec<OperationDraft>, ApiError> {
    let mut drafts = Vec::with_capacity(operations.len());
    for operation in operations {
        if operation.operation_type.is_empty() || operation.amount_in_cents <= 0 {
            return Err(ApiError::bad_request(
                "error missing/invalid required fields",
            ));
        }
        let operation_type = operation
            .operation_type
            .parse::<OperationKind>()
            .map_err(|e| ApiError::bad_request(format!("error invalid operation: {e}")))?;
        drafts.push(OperationDraft {
            operation_type,
            amount_in_cents: operation.amount_in_cents,
        });
    }
    Ok(drafts)
}

#[post("/execute_operations", format = "json", data = "<request>")]
async fn execute_operations(
    request: Result<Json<ExecuteOperationsRequest>, json::Error<'_>>,
    pool: &State<SqlitePool>,
    locks: &State<AccountLocks>,
) -> Result<ExecuteOperationsResponse, ApiError> {
    let request = request.map_err(|e| ApiError::decode(&e))?.into_inner();

    if request.tenant.is_empty() || request.operations.is_empty() {
        return Err(ApiError::bad_request("error missing required fields"));
    }
    if request.account_id <= 0 {
        return Err(ApiError::bad_request(
            "error missing/invalid account_id field",
        ));
    }
    if request.transaction_id < 0 {
        return Err(ApiError::bad_request(
            "error missing/invalid transaction_id field",
        ));
    }
    let operations = validate_operations(&request.operations)?;

    let command = ApplyCommand {
        account_id: request.account_id,
        tenant: request.tenant,
        transaction_id: (request.transaction_id != 0).then_some(request.transaction_id),
        operations,
    };

    let deadline = Deadline::after(EXECUTE_OPERATIONS_BUDGET);
    let outcome = apply::execute_operations(pool.inner(), locks.inner(), command, deadline)
        .await?;

    match outcome {
        ApplyOutcome::Committed {
            account,
            transaction,
        } => Ok(ExecuteOperationsResponse::Applied(Json(AppliedBody {
            account,
            transaction,
        }))),
        ApplyOutcome::Rejected {
            reason,
            account,
            transaction,
        } => Ok(ExecuteOperationsResponse::Rejected(Json(RejectedBody {
            error: reason.to_string(),
            account,
            transaction,
        }))),
    }
}

#[get("/get_account?<account_id>")]
async fn get_account(
    account_id: Option<i64>,
    pool: &State<SqlitePool>,
) -> Result<Json<Account>, ApiError> {
    let Some(account_id) = account_id.filter(|id| *id > 0) else {
        return Err(ApiError::bad_request(
            "error missing/invalid account_id parameter",
        ));
    };

    let deadline = Deadline::after(READ_BUDGET);
    let mut sql_tx = pool.begin().await.map_err(begin_error)?;
    let account = store::get_account(&mut sql_tx, deadline, account_id).await?;
    sql_tx.commit().await.map_err(commit_error)?;

    Ok(Json(account))
}

#[get("/get_transaction?<tenant>&<transaction_id>")]
async fn get_transaction(
    tenant: Option<String>,
    transaction_id: Option<i64>,
    pool: &State<SqlitePool>,
) -> Result<Json<TransactionWithOperations>, ApiError> {
    let Some(transaction_id) = transaction_id.filter(|id| *id > 0) else {
        return Err(ApiError::bad_request(
            "error missing/invalid transaction_id parameter",
        ));
    };
    let Some(tenant) = tenant.filter(|tenant| !tenant.is_empty()) else {
        return Err(ApiError::bad_request("error missing tenant parameter"));
    };

    let deadline = Deadline::after(READ_BUDGET);
    let mut sql_tx = pool.begin().await.map_err(begin_error)?;
    let result =
        store::get_transaction_with_operations(&mut sql_tx, deadline, &tenant, transaction_id)
            .await?;
    sql_tx.commit().await.map_err(commit_error)?;

    Ok(Json(result))
}

#[get("/health-check")]
async fn health_check(pool: &State<SqlitePool>) -> Result<(), ApiError> {
    let deadline = Deadline::after(HEALTH_CHECK_BUDGET);
    store::ping(pool, deadline).await.map_err(|err| {
        error!("health check failed: {err}");
        ApiError::internal(format!("error reaching store: {err}"))
    })
}

pub(crate) fn routes() -> Vec<Route> {
    routes![
        create_account,
        execute_operations,
        get_account,
        get_transaction,
        health_check,
    ]
}
