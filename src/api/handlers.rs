use actix_web::{web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, Blockchain, Transaction};
use crate::settings::LedgerConfig;

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Configuration shared with the handlers
pub type ConfigData = web::Data<LedgerConfig>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,

    /// Leading hex zeros required of new blocks
    pub difficulty: usize,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub value: f64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let is_valid = match blockchain.is_valid() {
        Ok(is_valid) => is_valid,
        Err(err) => {
            error!("Failed to validate chain: {}", err);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Failed to validate chain: {}", err)
            }));
        }
    };

    let chain = blockchain.get_chain();
    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
        difficulty: blockchain.difficulty(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    let transactions: Vec<Transaction> = blockchain.get_pending_transactions();
    HttpResponse::Ok().json(transactions)
}

/// Create a new transaction
///
/// Adds a new transaction to the transaction pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let TransactionRequest {
        sender,
        recipient,
        value,
    } = transaction_req.into_inner();

    let block_index = blockchain.add_transaction(sender, recipient, value);

    HttpResponse::Created().json(TransactionResponse {
        message: "Transaction will be added to Block".to_string(),
        block_index,
    })
}

/// Mine a new block
///
/// Runs proof of work over the pending transactions and appends the block
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 409, description = "Chain or pool kept changing while mining"),
        (status = 503, description = "No proof found within the mining budget"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(blockchain: BlockchainData, config: ConfigData) -> impl Responder {
    let budget = config.mining_budget();
    let miner = blockchain.get_ref().clone();

    // The search is CPU bound; keep it off the async workers
    match web::block(move || miner.mine_block(&budget)).await {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Ok(Err(err)) if err.is_proof_not_found() => {
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": format!("Failed to mine block: {}", err)
            }))
        }
        Ok(Err(err)) => {
            error!("Failed to mine block: {}", err);
            HttpResponse::Conflict().json(serde_json::json!({
                "error": format!("Failed to mine block: {}", err)
            }))
        }
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Mining task failed: {}", err)
        })),
    }
}

/// Check if the blockchain is valid
///
/// Validates hash linkage and proof of work of every block
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    match blockchain.is_valid() {
        Ok(is_valid) => HttpResponse::Ok().json(is_valid),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to validate chain: {}", err)
        })),
    }
}
