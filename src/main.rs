use anyhow::Context;
use anyhow::Result;
use dag_node_gateway::cli::Opts;
use dag_node_gateway::domain::FixedTipSelector;
use dag_node_gateway::domain::NullWalletIndex;
use dag_node_gateway::gateway;
use dag_node_gateway::logger;
use dag_node_gateway::metrics::CountingMetricsSource;
use dag_node_gateway::mining::MiningRequestHandler;
use dag_node_gateway::pubsub::Bus;
use dag_node_gateway::reactor::Reactor;
use dag_node_gateway::routes;
use dag_node_gateway::routes::AppState;
use dag_node_gateway::settings::Settings;
use std::sync::Arc;
use tracing::metadata::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::read();
    let data_dir = opts.data_dir()?;

    logger::init_tracing(LevelFilter::DEBUG, opts.json)?;

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .context("could not create data dir")?;
    }

    let mut settings = Settings::new(&data_dir, opts.http_address).await;
    settings.max_pow_threads = opts.max_pow_threads;
    settings.ws_max_subs_addrs_conn = opts.ws_max_subs_addrs_conn;
    settings.ws_max_subs_addrs_empty = opts.ws_max_subs_addrs_empty;
    settings.hathor_token_uid = opts.hathor_token_uid.clone();

    let reactor = Reactor::new(tokio::runtime::Handle::current());
    reactor.start();

    let bus = Bus::new(reactor.clone());
    let metrics_source = Arc::new(CountingMetricsSource::new());
    let wallet_index = Arc::new(NullWalletIndex);
    // Genesis has no parents to select among; a real node wires this to its
    // consensus/tip-selection subsystem (out of scope, spec section 1).
    let tip_selector = Arc::new(FixedTipSelector(Vec::new()));

    let gateway_handle = gateway::start(
        settings.to_gateway_config(),
        wallet_index,
        metrics_source,
        bus.clone(),
        reactor.clone(),
    );

    let mining = Arc::new(MiningRequestHandler::new(
        settings.max_pow_threads,
        tip_selector,
        bus,
    ));

    let state = AppState { gateway: gateway_handle, mining };
    let router = routes::router(state);

    tracing::info!(address = %settings.http_address, "starting websocket gateway and mining endpoint");

    axum::Server::bind(&settings.http_address)
        .serve(router.into_make_service())
        .await
        .context("http server failed")?;

    Ok(())
}
