//! `droidpilot doctor` — Diagnose configuration and model reachability.

use droidpilot_config::AppConfig;
use droidpilot_core::Provider;
use droidpilot_providers::OpenAiCompatProvider;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 droidpilot Doctor — System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ⚠️  No config file at {} — using defaults", config_path.display());
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. Fix the config before continuing.");
            return Ok(());
        }
    };

    if config.model.api_key == "EMPTY" || config.model.api_key.is_empty() {
        println!("  ⚠️  No API key set (fine for local vLLM/SGLang servers)");
    } else {
        println!("  ✅ API key configured");
    }

    let provider = OpenAiCompatProvider::from_config(&config.model);
    match provider.health_check().await {
        Ok(true) => {
            println!("  ✅ Model endpoint reachable: {}", config.model.base_url);

            match provider.list_models().await {
                Ok(models) if models.iter().any(|m| m == &config.model.model_name) => {
                    println!("  ✅ Model `{}` is served", config.model.model_name);
                }
                Ok(models) if !models.is_empty() => {
                    println!(
                        "  ⚠️  Model `{}` not listed; endpoint serves: {}",
                        config.model.model_name,
                        models.join(", ")
                    );
                    issues += 1;
                }
                Ok(_) => println!("  ⚠️  Endpoint did not list any models"),
                Err(e) => println!("  ⚠️  Could not list models: {e}"),
            }
        }
        Ok(false) => {
            println!("  ❌ Model endpoint answered with an error: {}", config.model.base_url);
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Model endpoint unreachable: {e}");
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
