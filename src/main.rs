use std::sync::Arc;

use anyhow::Result;
use bot_subscriptions::{
    application::usecases::{
        expiry_notifications::ExpiryNotificationUseCase, plans::PlanUseCase,
        subscription_stats::SubscriptionStatsUseCase, subscriptions::SubscriptionUseCase,
    },
    background_worker::{
        expiry_scheduler::ExpiryScheduler,
        subscribe_pool::{PoolConfig, SubscribePool},
    },
    config::config_loader,
    domain::repositories::{
        plans::PlanRepository, subscriptions::SubscriptionRepository, users::UserRepository,
    },
    infrastructure::{
        bot_api::notification_sender::BotApiNotificationSender,
        postgres::{
            postgres_connection,
            repositories::{
                plans::PlanPostgres, subscriptions::SubscriptionPostgres, users::UserPostgres,
            },
        },
    },
    observability,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Subscription engine exited with error: {:#}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    observability::init_observability("subscription-engine")?;

    let stage = config_loader::get_stage();
    let dotenvy_env = config_loader::load()?;
    info!(%stage, "ENV has been loaded");

    let postgres_pool = Arc::new(postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?);
    info!("Postgres connection has been established");

    let user_repo: Arc<dyn UserRepository + Send + Sync> =
        Arc::new(UserPostgres::new(Arc::clone(&postgres_pool)));
    let plan_repo: Arc<dyn PlanRepository + Send + Sync> =
        Arc::new(PlanPostgres::new(Arc::clone(&postgres_pool)));
    let subscription_repo: Arc<dyn SubscriptionRepository + Send + Sync> =
        Arc::new(SubscriptionPostgres::new(Arc::clone(&postgres_pool)));

    let plans = PlanUseCase::new(Arc::clone(&plan_repo)).list_plans().await?;
    let stats = SubscriptionStatsUseCase::new(Arc::clone(&subscription_repo))
        .get_stats()
        .await?;
    info!(
        plans = plans.len(),
        active_subscriptions = stats.total_active_subscriptions,
        remaining_credits = stats.total_remaining_credits,
        "Subscription store is reachable"
    );

    let subscription_usecase = Arc::new(SubscriptionUseCase::new(
        Arc::clone(&user_repo),
        Arc::clone(&plan_repo),
        Arc::clone(&subscription_repo),
    ));
    let subscribe_pool = SubscribePool::start(
        subscription_usecase,
        PoolConfig {
            workers: dotenvy_env.subscribe_pool.workers,
            queue_capacity: dotenvy_env.subscribe_pool.queue_capacity,
        },
    );

    let notification_sender = Arc::new(BotApiNotificationSender::new(
        &dotenvy_env.bot_api.base_url,
        &dotenvy_env.bot_api.token,
        dotenvy_env.bot_api.request_timeout,
        Arc::clone(&user_repo),
    )?);
    let expiry_notifications = Arc::new(ExpiryNotificationUseCase::new(
        Arc::clone(&subscription_repo),
        notification_sender,
        dotenvy_env.expiry_scheduler.notify_horizon_days,
    ));
    let expiry_scheduler = ExpiryScheduler::new(expiry_notifications);
    expiry_scheduler.start(dotenvy_env.expiry_scheduler.interval)?;

    info!("Subscription engine is running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    expiry_scheduler.stop().await;
    if let Err(err) = subscribe_pool
        .shutdown(dotenvy_env.subscribe_pool.shutdown_timeout)
        .await
    {
        warn!(error = %err, "Subscribe pool did not shut down cleanly");
    }

    info!("Subscription engine stopped");
    Ok(())
}
