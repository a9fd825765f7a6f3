use std::{
    collections::HashSet,
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use geojson::FeatureCollection;
use log::{info, warn};
use rayon::prelude::*;

use crate::{
    bbox::BBox,
    llm::{ExpectedGeometry, OpenAi},
    overpass::{Overpass, BBOX_PLACEHOLDER},
    session::{Outcome, Session},
    settings::Settings,
    utils::{agent, layer_file_name, spinner},
};

mod bbox;
mod convert;
mod llm;
mod osm;
mod overpass;
mod session;
mod settings;
mod utils;

#[derive(Debug, Parser)]
#[command(version, about = "Fetch OpenStreetMap features as GeoJSON, described in plain language")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert saved Overpass JSON responses to GeoJSON
    Convert {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Write `<input>.geojson` files here instead of printing
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run an Overpass QL query (or `@file`) and write the result as GeoJSON
    Fetch {
        query: String,
        /// min_lon,min_lat,max_lon,max_lat, substituted for `{{bbox}}`
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<BBox>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Ask for map features in natural language
    Ask {
        message: String,
        /// min_lon,min_lat,max_lon,max_lat of the map view
        #[arg(long, allow_hyphen_values = true)]
        bbox: BBox,
        /// Conversation history, read before and written after the request
        #[arg(long)]
        history: Option<PathBuf>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Convert { inputs, output_dir } => convert_files(&inputs, output_dir.as_deref()),
        Command::Fetch {
            query,
            bbox,
            output,
        } => fetch(&settings, &query, bbox.as_ref(), output.as_deref()),
        Command::Ask {
            message,
            bbox,
            history,
            language,
            output_dir,
        } => {
            let language = language.unwrap_or_else(|| settings.language.clone());
            ask(
                &settings,
                &message,
                &bbox,
                history.as_deref(),
                &language,
                &output_dir,
            )
        }
    }
}

fn convert_files(inputs: &[PathBuf], output_dir: Option<&Path>) -> Result<()> {
    if let ([input], None) = (inputs, output_dir) {
        println!("{}", convert::to_geojson_string(&convert_file(input)?)?);
        return Ok(());
    }

    let outputs = output_paths(inputs, output_dir.unwrap_or(Path::new(".")))?;
    if let Some(dir) = output_dir {
        create_dir_all(dir)?;
    }

    // each file gets its own node index, so they convert independently
    inputs
        .par_iter()
        .zip(&outputs)
        .try_for_each(|(input, output)| write_geojson(output, &convert_file(input)?))
}

/// `<output_dir>/<input stem>.geojson` for each input. Two inputs may not share an output.
fn output_paths(inputs: &[PathBuf], output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let name = input.with_extension("geojson");
            let name = name
                .file_name()
                .with_context(|| format!("not a file: {}", input.display()))?;
            let output = output_dir.join(name);
            if !seen.insert(output.clone()) {
                bail!(
                    "{} would overwrite the output of another input ({})",
                    input.display(),
                    output.display()
                );
            }
            Ok(output)
        })
        .collect()
}

fn convert_file(path: &Path) -> Result<FeatureCollection> {
    let text =
        read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    convert::convert_str(&text)
        .with_context(|| format!("failed to convert {}", path.display()))
}

fn fetch(
    settings: &Settings,
    query: &str,
    bbox: Option<&BBox>,
    output: Option<&Path>,
) -> Result<()> {
    let mut query = match query.strip_prefix('@') {
        Some(path) => read_to_string(path).with_context(|| format!("failed to read {path}"))?,
        None => query.to_string(),
    };
    match bbox {
        Some(bbox) => query = overpass::with_bbox(&query, bbox),
        None if query.contains(BBOX_PLACEHOLDER) => {
            bail!("query uses {BBOX_PLACEHOLDER} but no --bbox was given")
        }
        None => (),
    }
    let query = overpass::ensure_json_output(&query, settings.timeout_secs);

    let source = Overpass::new(agent(settings), settings.overpass_url.clone());
    let bar = spinner("Fetching data...");
    let collection = overpass::fetch_geojson(&source, &query);
    bar.finish_and_clear();
    let collection = collection?;

    match output {
        Some(path) => write_geojson(path, &collection),
        None => {
            println!("{}", convert::to_geojson_string(&collection)?);
            Ok(())
        }
    }
}

fn ask(
    settings: &Settings,
    message: &str,
    bbox: &BBox,
    history: Option<&Path>,
    language: &str,
    output_dir: &Path,
) -> Result<()> {
    let mut session = match history {
        Some(path) => Session::load(path)?,
        None => Session::default(),
    };

    let agent = agent(settings);
    let assistant = OpenAi {
        agent: agent.clone(),
        url: settings.openai_url.clone(),
        model: settings.model.clone(),
        temperature: settings.temperature,
        api_key: settings.api_key()?,
    };
    let source = Overpass::new(agent, settings.overpass_url.clone());

    info!("Asking within {bbox}");
    let bar = spinner("Thinking...");
    let outcome = session.ask(&assistant, &source, message, bbox, language);
    bar.finish_and_clear();

    if let Some(path) = history {
        session.save(path)?;
    }

    match outcome.context("Operation failed")? {
        Outcome::Reply(message) => println!("{message}"),
        Outcome::Layer {
            name,
            notes,
            expected_geometry,
            collection,
        } => {
            create_dir_all(output_dir)?;
            let path = output_dir.join(layer_file_name(&name));
            write_geojson(&path, &collection)?;
            match expected_geometry {
                ExpectedGeometry::Other => warn!("Unrecognised expected geometry hint"),
                x => info!("Expected geometry was {x:?}"),
            }
            println!(
                "Successfully added layer: {name} ({} features, {})",
                collection.features.len(),
                path.display()
            );
            if !notes.is_empty() {
                println!("{notes}");
            }
        }
    }

    Ok(())
}

fn write_geojson(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let mut contents = convert::to_geojson_string(collection)?;
    contents.push('\n');
    write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    info!(
        "Wrote {} features to {}",
        collection.features.len(),
        path.display()
    );
    Ok(())
}
