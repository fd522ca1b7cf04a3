use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pow_ledger::api;
use pow_ledger::blockchain::{self, Blockchain};
use pow_ledger::settings::LedgerConfig;

// Mine the pending transactions into one block and print the chain
fn mine_round(blockchain: &Blockchain, config: &LedgerConfig) -> anyhow::Result<()> {
    let proof = match blockchain.proof_of_work(&config.mining_budget()) {
        Ok(proof) => proof,
        Err(err) if err.is_proof_not_found() => {
            warn!("Skipping round: {}", err);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    blockchain.commit(proof)?;
    print!("{}", blockchain);

    Ok(())
}

// Two rounds: one transfer, then two transfers in one block
fn run_demo(blockchain: &Blockchain, config: &LedgerConfig) -> anyhow::Result<()> {
    blockchain.add_transaction("a", "b", 20000.0);
    mine_round(blockchain, config)?;

    blockchain.add_transaction("x", "y", 200.0);
    blockchain.add_transaction("c", "k", 3070.0);
    mine_round(blockchain, config)?;

    Ok(())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Proof-of-work Ledger API",
        version = "0.1.0",
        description = "A minimal append-only proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = LedgerConfig::load().context("failed to load configuration")?;
    info!(
        "Mining difficulty {} with {} worker(s)",
        config.mining_difficulty, config.mining_workers
    );

    let blockchain = Blockchain::new(&config)?;
    run_demo(&blockchain, &config)?;

    let bind = match config.http_bind.clone() {
        Some(bind) => bind,
        None => return Ok(()),
    };

    let blockchain = web::Data::new(blockchain);
    let config = web::Data::new(config);

    info!("Starting HTTP server at http://{}", bind);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .app_data(config.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi())
            )
    })
    .bind(bind.as_str())
    .with_context(|| format!("failed to bind {}", bind))?
    .run()
    .await?;

    Ok(())
}
