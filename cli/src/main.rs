use anyhow::{Context, Result};
use c2pa_compose::{
    Builder, C2paEngine, Destination, DigitalSourceType, Envconfig, Intent, LocalSigner,
    LocalSignerConfig, ProvenanceEngine, Reader, Settings, Source, load_settings_from_file,
    load_settings_from_url, parse_algorithm,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "A command line tool to add and inspect content credentials using c2pa-compose."
)]
struct Arguments {
    /// Settings file or URL (JSON or TOML). Falls back to $SETTINGS.
    #[arg(short, long, global = true)]
    settings: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign a file with a local certificate and key.
    Sign {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Manifest definition, inline JSON or a path to a JSON file.
        #[arg(short, long)]
        manifest_definition: Option<String>,

        /// Certificate chain (PEM or p7b). Falls back to $SIGNING_CERT.
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// PEM private key. Falls back to $SIGNING_KEY.
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        #[arg(long, default_value = "es256")]
        algorithm: String,

        #[arg(long)]
        time_authority_url: Option<String>,

        #[arg(long, value_enum, default_value_t = IntentArg::Edit)]
        intent: IntentArg,

        /// IPTC digital source type URI for `--intent create`.
        #[arg(long)]
        source_type: Option<String>,

        /// File to record as the parent ingredient.
        #[arg(long)]
        parent: Option<PathBuf>,

        /// Also write the unsigned builder archive here.
        #[arg(long)]
        archive: Option<PathBuf>,
    },
    /// Print the manifest store of a file.
    Read {
        #[arg(short, long)]
        input: PathBuf,

        /// Detached manifest to validate against the input.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IntentArg {
    Create,
    Edit,
    Update,
}

const DEFAULT_MANIFEST: &str = r##"
{
}
"##;

async fn load_settings(location: Option<&str>) -> Result<Option<Settings>> {
    let Some(location) = location else {
        return Ok(None);
    };
    let text = if location.starts_with("http://") || location.starts_with("https://") {
        load_settings_from_url(location).await?
    } else {
        load_settings_from_file(location).await?
    };
    Ok(Some(Settings::parse(&text)?))
}

fn manifest_definition(manifest: Option<String>) -> Result<String> {
    Ok(match manifest {
        Some(manifest) => {
            let path = Path::new(&manifest);
            if path.exists() {
                fs::read_to_string(path)?
            } else {
                manifest
            }
        }
        None => DEFAULT_MANIFEST.to_owned(),
    })
}

fn intent(intent: IntentArg, source_type: Option<String>) -> Result<Intent> {
    Ok(match intent {
        IntentArg::Create => Intent::Create(match source_type {
            Some(uri) => DigitalSourceType::new(uri)?,
            None => DigitalSourceType::digital_capture(),
        }),
        IntentArg::Edit => Intent::Edit,
        IntentArg::Update => Intent::Update,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Arguments::parse();
    let engine: Arc<dyn ProvenanceEngine> = Arc::new(C2paEngine::new());

    match args.command {
        Command::Sign {
            input,
            output,
            manifest_definition: manifest,
            cert,
            key,
            algorithm,
            time_authority_url,
            intent: intent_arg,
            source_type,
            parent,
            archive,
        } => {
            let (signer, env_settings) = match (cert, key) {
                (Some(cert), Some(key)) => (
                    LocalSigner::from_files(
                        cert,
                        key,
                        parse_algorithm(&algorithm)?,
                        time_authority_url,
                    )?,
                    None,
                ),
                _ => {
                    let config = LocalSignerConfig::init_from_env()
                        .context("no --cert/--key given and SIGNING_CERT/SIGNING_KEY not set")?;
                    (config.signer()?, config.settings)
                }
            };
            let settings =
                load_settings(args.settings.as_deref().or(env_settings.as_deref())).await?;

            let manifest = manifest_definition(manifest)?;
            let mut builder = Builder::with_json(engine, &manifest, settings.as_ref())?;
            builder.set_intent(intent(intent_arg, source_type)?)?;
            if let Some(parent) = parent {
                let title = parent
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ingredient = json!({ "title": title, "relationship": "parentOf" });
                builder
                    .add_ingredient(&ingredient.to_string(), Some(Source::file(parent)))
                    .await?;
            }
            if let Some(archive) = archive {
                builder.to_archive(Destination::file(archive)).await?;
            }

            let manifest = builder.sign(&signer, Source::file(input), Destination::file(&output))?;
            log::info!(
                "Successfully signed {} ({} byte manifest).",
                output.display(),
                manifest.len()
            );
        }
        Command::Read { input, manifest } => {
            let settings = load_settings(args.settings.as_deref()).await?;
            let reader = match manifest {
                Some(manifest) => Some(
                    Reader::from_manifest_data_and_asset(
                        engine,
                        &fs::read(manifest)?,
                        Source::file(&input),
                        settings.as_ref(),
                    )
                    .await?,
                ),
                None => Reader::from_asset(engine, Source::file(&input), settings.as_ref()).await?,
            };
            match reader {
                Some(reader) => {
                    log::info!("Validation state: {:?}", reader.validation_state()?);
                    println!("{}", reader.json()?);
                }
                None => log::warn!("No manifest found in {}", input.display()),
            }
        }
    }
    Ok(())
}
