use utoipa::OpenApi;

use super::{handlers, schema};
use crate::ledger::{block, stats, verifier};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_owners,
        handlers::get_chain,
        handlers::record_session,
        handlers::append_block,
        handlers::get_block,
        handlers::complete_session,
        handlers::get_tail,
        handlers::verify_owner,
        handlers::verify_all,
        handlers::get_stats,
        handlers::export_chain
    ),
    components(
        schemas(
            block::Block,
            block::OwnerId,
            block::SessionRecord,
            block::SessionStatus,
            verifier::Violation,
            verifier::ViolationKind,
            stats::ChainStats,
            stats::ChainExport,
            stats::ChainSummary,
            stats::ExportVerification,
            schema::DurationUnit,
            schema::SessionRequest,
            schema::ChainResponse,
            schema::BlockResponse,
            schema::VerificationResponse,
            schema::ErrorResponse
        )
    ),
    tags(
        (name = "study_chain", description = "Study session ledger endpoints")
    ),
    info(
        title = "Study Chain API",
        version = "1.0.0",
        description = "A tamper-evident proof-of-work ledger of study sessions",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;
