use actix_web::{http::StatusCode, web, HttpResponse};
use chrono::Utc;
use log::{error, warn};

use std::str::FromStr;

use super::schema::{BlockResponse, ChainResponse, ErrorResponse, SessionRequest, VerificationResponse};
use crate::ledger::{verify_chain, Block, ChainExport, ChainStats, Ledger, LedgerError, OwnerId};

/// Data structure for the ledger state
pub type LedgerData = web::Data<Ledger>;

fn error_body(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message.into(),
        block: None,
    })
}

/// Maps a ledger failure to its HTTP status
fn ledger_error(err: LedgerError) -> HttpResponse {
    let status = match &err {
        LedgerError::InvalidPayload(_)
        | LedgerError::InvalidParameters(_)
        | LedgerError::InvalidBlock(_) => StatusCode::BAD_REQUEST,
        LedgerError::MiningExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::MiningCancelled { .. } | LedgerError::MiningTimedOut { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        LedgerError::BlockNotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::AlreadyCompleted { .. } => StatusCode::CONFLICT,
        LedgerError::ChainRead(_) | LedgerError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    }

    let message = err.to_string();
    let block = match err {
        LedgerError::Store { block, .. } => Some(*block),
        _ => None,
    };

    HttpResponse::build(status).json(ErrorResponse { error: message, block })
}

fn parse_owner(raw: &str) -> Result<OwnerId, HttpResponse> {
    OwnerId::from_str(raw).map_err(|err| error_body(StatusCode::BAD_REQUEST, err.to_string()))
}

/// Runs a ledger call that may wait on a chain lock on the blocking pool
async fn run_blocking<F>(job: F) -> Result<Block, HttpResponse>
where
    F: FnOnce() -> Result<Block, LedgerError> + Send + 'static,
{
    match web::block(job).await {
        Ok(result) => result.map_err(ledger_error),
        Err(err) => {
            error!("Ledger task failed: {}", err);
            Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, "Ledger task failed"))
        }
    }
}

/// List chain owners
///
/// Returns every owner that has at least one block
#[utoipa::path(
    get,
    path = "/api/v1/chains",
    responses(
        (status = 200, description = "Owners retrieved successfully", body = Vec<OwnerId>),
        (status = 500, description = "Chain store unavailable", body = ErrorResponse)
    )
)]
pub async fn get_owners(ledger: LedgerData) -> HttpResponse {
    match ledger.owners() {
        Ok(owners) => HttpResponse::Ok().json(owners),
        Err(err) => ledger_error(err),
    }
}

/// Get an owner's chain
///
/// Returns the whole chain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chains/{owner}",
    params(("owner" = String, Path, description = "Chain owner")),
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Chain store unavailable", body = ErrorResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData, owner: web::Path<String>) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match ledger.chain(&owner) {
        Ok(chain) => {
            let is_valid = verify_chain(&chain).is_valid();
            HttpResponse::Ok().json(ChainResponse {
                owner_id: owner,
                length: chain.len(),
                chain,
                is_valid,
            })
        }
        Err(err) => ledger_error(err),
    }
}

/// Record a study session
///
/// Mines a block holding the session and appends it to the owner's chain
#[utoipa::path(
    post,
    path = "/api/v1/chains/{owner}/blocks",
    params(("owner" = String, Path, description = "Chain owner")),
    request_body = SessionRequest,
    responses(
        (status = 201, description = "Block mined and stored", body = BlockResponse),
        (status = 400, description = "Invalid session data", body = ErrorResponse),
        (status = 422, description = "No nonce satisfies the difficulty", body = ErrorResponse),
        (status = 503, description = "Mining timed out", body = ErrorResponse),
        (status = 500, description = "Block mined but not stored", body = ErrorResponse)
    )
)]
pub async fn record_session(
    ledger: LedgerData,
    owner: web::Path<String>,
    session_req: web::Json<SessionRequest>,
) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    let record = match session_req.into_inner().into_record(Utc::now().date_naive()) {
        Ok(record) => record,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, err.to_string()),
    };

    match run_blocking(move || ledger.record_session(&owner, record)).await {
        Ok(block) => HttpResponse::Created().json(BlockResponse {
            message: format!("Block #{} mined", block.sequence_number),
            block,
        }),
        Err(response) => response,
    }
}

/// Store an already mined block
///
/// Retries persisting a block returned by a failed store
#[utoipa::path(
    post,
    path = "/api/v1/chains/{owner}/blocks/append",
    params(("owner" = String, Path, description = "Chain owner")),
    request_body = Block,
    responses(
        (status = 201, description = "Block stored", body = BlockResponse),
        (status = 400, description = "Block is not sealed or belongs elsewhere", body = ErrorResponse),
        (status = 500, description = "Block could not be stored", body = ErrorResponse)
    )
)]
pub async fn append_block(
    ledger: LedgerData,
    owner: web::Path<String>,
    block: web::Json<Block>,
) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    let block = block.into_inner();
    if block.owner_id != owner {
        return error_body(
            StatusCode::BAD_REQUEST,
            format!("Block belongs to chain {}, not {}", block.owner_id, owner),
        );
    }

    // The chain lock may be held by a long-running mine.
    match run_blocking(move || ledger.append(block)).await {
        Ok(block) => HttpResponse::Created().json(BlockResponse {
            message: format!("Block #{} stored", block.sequence_number),
            block,
        }),
        Err(response) => response,
    }
}

/// Get one block
#[utoipa::path(
    get,
    path = "/api/v1/chains/{owner}/blocks/{sequence_number}",
    params(
        ("owner" = String, Path, description = "Chain owner"),
        ("sequence_number" = u64, Path, description = "Position in the chain")
    ),
    responses(
        (status = 200, description = "Block retrieved successfully", body = Block),
        (status = 404, description = "No such block", body = ErrorResponse)
    )
)]
pub async fn get_block(ledger: LedgerData, path: web::Path<(String, u64)>) -> HttpResponse {
    let (owner, sequence_number) = path.into_inner();
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match ledger.block(&owner, sequence_number) {
        Ok(Some(block)) => HttpResponse::Ok().json(block),
        Ok(None) => ledger_error(LedgerError::BlockNotFound {
            owner,
            sequence_number,
        }),
        Err(err) => ledger_error(err),
    }
}

/// Mark a session as completed
///
/// Appends a block that supersedes the pending one; the original stays in the chain
#[utoipa::path(
    post,
    path = "/api/v1/chains/{owner}/blocks/{sequence_number}/complete",
    params(
        ("owner" = String, Path, description = "Chain owner"),
        ("sequence_number" = u64, Path, description = "Block of the pending session")
    ),
    responses(
        (status = 201, description = "Completion block mined and stored", body = BlockResponse),
        (status = 404, description = "No such block", body = ErrorResponse),
        (status = 409, description = "Session already completed", body = ErrorResponse)
    )
)]
pub async fn complete_session(ledger: LedgerData, path: web::Path<(String, u64)>) -> HttpResponse {
    let (owner, sequence_number) = path.into_inner();
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match run_blocking(move || ledger.complete_session(&owner, sequence_number)).await {
        Ok(block) => HttpResponse::Created().json(BlockResponse {
            message: format!("Session #{} completed", sequence_number),
            block,
        }),
        Err(response) => response,
    }
}

/// Get the last block of a chain
#[utoipa::path(
    get,
    path = "/api/v1/chains/{owner}/tail",
    params(("owner" = String, Path, description = "Chain owner")),
    responses(
        (status = 200, description = "Tail retrieved successfully", body = Block),
        (status = 404, description = "Chain is empty", body = ErrorResponse)
    )
)]
pub async fn get_tail(ledger: LedgerData, owner: web::Path<String>) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match ledger.tail(&owner) {
        Ok(Some(block)) => HttpResponse::Ok().json(block),
        Ok(None) => error_body(StatusCode::NOT_FOUND, format!("Chain {} is empty", owner)),
        Err(err) => ledger_error(err),
    }
}

/// Verify a chain
///
/// Recomputes every hash and reports each failed check
#[utoipa::path(
    get,
    path = "/api/v1/chains/{owner}/verify",
    params(("owner" = String, Path, description = "Chain owner")),
    responses(
        (status = 200, description = "Chain verified", body = VerificationResponse),
        (status = 500, description = "Chain store unavailable", body = ErrorResponse)
    )
)]
pub async fn verify_owner(ledger: LedgerData, owner: web::Path<String>) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match ledger.verify_owner(&owner) {
        Ok(report) => {
            if !report.is_valid() {
                warn!("Chain {} failed verification: {}", owner, report.summary());
            }
            HttpResponse::Ok().json(VerificationResponse::new(owner, report))
        }
        Err(err) => ledger_error(err),
    }
}

/// Verify every chain
#[utoipa::path(
    get,
    path = "/api/v1/verify",
    responses(
        (status = 200, description = "Chains verified", body = Vec<VerificationResponse>),
        (status = 500, description = "Chain store unavailable", body = ErrorResponse)
    )
)]
pub async fn verify_all(ledger: LedgerData) -> HttpResponse {
    match ledger.verify_all() {
        Ok(reports) => {
            let responses: Vec<VerificationResponse> = reports
                .into_iter()
                .map(|(owner, report)| VerificationResponse::new(owner, report))
                .collect();
            HttpResponse::Ok().json(responses)
        }
        Err(err) => ledger_error(err),
    }
}

/// Get study statistics for a chain
#[utoipa::path(
    get,
    path = "/api/v1/chains/{owner}/stats",
    params(("owner" = String, Path, description = "Chain owner")),
    responses(
        (status = 200, description = "Statistics computed", body = ChainStats),
        (status = 500, description = "Chain store unavailable", body = ErrorResponse)
    )
)]
pub async fn get_stats(ledger: LedgerData, owner: web::Path<String>) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match ledger.stats(&owner, Utc::now().date_naive()) {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(err) => ledger_error(err),
    }
}

/// Export a chain
///
/// Returns the blocks together with how they were produced and a verification result
#[utoipa::path(
    get,
    path = "/api/v1/chains/{owner}/export",
    params(("owner" = String, Path, description = "Chain owner")),
    responses(
        (status = 200, description = "Chain exported", body = ChainExport),
        (status = 500, description = "Chain store unavailable", body = ErrorResponse)
    )
)]
pub async fn export_chain(ledger: LedgerData, owner: web::Path<String>) -> HttpResponse {
    let owner = match parse_owner(&owner) {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    match ledger.export(&owner) {
        Ok(export) => HttpResponse::Ok().json(export),
        Err(err) => ledger_error(err),
    }
}
