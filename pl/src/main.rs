use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{debug, info};
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

use plates::cli::{Cli, Command};
use plates::config::Config;
use plates::{Engine, RenderOptions, minify_html, script};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let filter = match level.map(|s| s.to_uppercase()) {
        Some(s) => s.parse().map_err(|_| eyre::eyre!("Unknown log level: {}", s))?,
        None => log::LevelFilter::Warn,
    };
    env_logger::Builder::from_default_env().filter_level(filter).init();
    Ok(())
}

fn load_data(data: Option<String>, data_file: Option<&Path>) -> Result<Value> {
    if let Some(json) = data {
        return serde_json::from_str(&json).context("Failed to parse --data as JSON");
    }
    let Some(path) = data_file else {
        return Ok(Value::Null);
    };

    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&content).context(format!("Failed to parse {}", path.display()))
    } else {
        serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))
    }
}

/// `users/profile.plate.html` under the views root becomes `users.profile`
fn logical_name(root: &Path, path: &Path, extension: &str) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.to_str()?;
    let stem = relative.strip_suffix(extension)?;
    Some(stem.replace(std::path::MAIN_SEPARATOR, "."))
}

fn check(engine: &Engine) -> Result<()> {
    let root = engine.config().views_path.clone();
    let extension = engine.config().extension.clone();
    let mut failures = 0;
    let mut checked = 0;

    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.context("Failed to walk views directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = logical_name(&root, entry.path(), &extension) else {
            debug!("check: skipping {}", entry.path().display());
            continue;
        };

        checked += 1;
        let result = engine
            .compile(&name, None)
            .map_err(|e| e.to_string())
            .and_then(|compiled| script::parse(&compiled).map_err(|e| e.to_string()));
        match result {
            Ok(_) => println!("{} {}", "✓".green(), name),
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), name.yellow(), e);
            }
        }
    }

    if failures > 0 {
        return Err(eyre::eyre!("{} of {} templates failed to compile", failures, checked));
    }
    println!("{} templates ok", checked);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(views) = cli.views {
        config.views_path = views;
    }

    info!("plates starting with views at {}", config.views_path.display());

    match cli.command {
        Command::Render {
            name,
            data,
            data_file,
            locale,
            module,
            minify,
        } => {
            let data = load_data(data, data_file.as_deref())?;
            let engine = Engine::new(config)?;
            let options = RenderOptions { locale, module };
            let mut html = engine.render_with(&name, data, &options)?;
            if minify && !engine.config().compress_content {
                html = engine.minify(&html);
            }
            print!("{}", html);
        }
        Command::Compile { name, module } => {
            let engine = Engine::new(config)?;
            print!("{}", engine.compile(&name, module.as_deref())?);
        }
        Command::Check => {
            let engine = Engine::new(config)?;
            check(&engine)?;
        }
        Command::Purge { name, module } => {
            let engine = Engine::new(config)?;
            match name {
                Some(name) => {
                    engine.purge(&name, module.as_deref())?;
                    println!("{} Purged {}", "✓".green(), name.cyan());
                }
                None => {
                    engine.purge_all()?;
                    println!("{} Purged all compiled templates", "✓".green());
                }
            }
        }
        Command::Minify { file, keep_comments } => {
            let html = match file {
                Some(path) => fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    io::stdin().read_to_string(&mut buffer).context("Failed to read stdin")?;
                    buffer
                }
            };
            print!("{}", minify_html(&html, keep_comments));
        }
    }

    Ok(())
}
