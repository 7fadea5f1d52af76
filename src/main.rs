use std::sync::Arc;

use chrono::Utc;
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info, warn};

use raidguard::moderation::SerenityPlatform;
use raidguard::{BOT_NAME, Data, Error, Settings, commands, handlers, logging};

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    logging::log_command_error(&error);

    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            if let Err(e) = ctx.say(format!("Error: {error}")).await {
                warn!(error = %e, "Failed to report command error");
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                warn!(error = %e, "Failed to handle framework error");
            }
        }
    }
}

/// Periodically drop idle counters
fn spawn_maintenance(data: Data) {
    let period = data.settings.maintenance_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            data.run_maintenance(Utc::now());
        }
    });
}

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;

    logging::init(&settings.log_dir)?;

    let token = settings.token.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::commands(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::handle_event(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                let platform = Arc::new(SerenityPlatform::new(Arc::clone(&ctx.http)));
                let data = Data::load(settings, platform).await?;

                let rearmed = data.automod.rearm().await;
                logging::log_console(&format!("Restored {rearmed} pending sanctions"));

                match data.settings.dev_guild {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            guild_id,
                        )
                        .await?;
                        logging::log_console(&format!("Registered commands in guild {guild_id}"));
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?;
                        logging::log_console("Registered commands globally");
                    }
                }

                spawn_maintenance(data.clone());
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting {BOT_NAME}...");
    client.start().await?;

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        error!(error = %err, "Fatal error");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
