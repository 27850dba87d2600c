/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{env, process};

use dkim_verify::{
    verifier::{Config, Verifier},
    Resolver,
};
use tokio::io::{self, AsyncReadExt};
use tracing_subscriber::EnvFilter;

// Usage: dkim_verify [message.eml] < message.eml
// Set DKIM_VERIFY_CONFIG to a JSON document to override the defaults.

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let raw_message = match env::args().nth(1) {
        Some(path) => tokio::fs::read(&path).await.unwrap_or_else(|err| {
            eprintln!("failed to read {path}: {err}");
            process::exit(1);
        }),
        None => {
            let mut raw_message = Vec::new();
            io::stdin()
                .read_to_end(&mut raw_message)
                .await
                .unwrap_or_else(|err| {
                    eprintln!("failed to read stdin: {err}");
                    process::exit(1);
                });
            raw_message
        }
    };

    let config = match env::var("DKIM_VERIFY_CONFIG") {
        Ok(config) => serde_json::from_str::<Config>(&config).unwrap_or_else(|err| {
            eprintln!("invalid DKIM_VERIFY_CONFIG: {err}");
            process::exit(1);
        }),
        Err(_) => Config::default(),
    };

    let resolver = Resolver::new_system_conf().unwrap_or_else(|err| {
        eprintln!("failed to load resolver configuration: {err}");
        process::exit(1);
    });

    match Verifier::new(resolver, config).verify(&raw_message).await {
        Ok(verdict) => {
            println!("{}", serde_json::to_string_pretty(&verdict).unwrap());
            println!();
            println!(
                "Authentication-Results: {}",
                verdict.auth_results("localhost")
            );
        }
        Err(err) => {
            eprintln!("failed to verify message: {err}");
            process::exit(1);
        }
    }
}
