use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use bget::{
    AppConfig, BiliSource, Container, DeliveryKind, DownloadRequest, MetadataProbe, Muxer,
    Orchestrator, StreamFetcher, TaskStatus,
};
use bget::process::TokioProcessRunner;
use bget_extractor::{
    ApiClient, AssetResolver, Credential, KeyCache, PlaybackNegotiator, QualityTier, SignedApi,
    DEFAULT_TIER, DEFAULT_UA, default_client,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Merge video and audio into one file.
    Merged,
    /// Audio only, converted to mp3.
    Audio,
    /// Video stream only, no audio track.
    Video,
}

#[derive(Parser, Debug)]
#[command(name = "bget", about = "Download videos by URL, share text, or id")]
struct Args {
    /// Video URL, share text, or bare BV/av id.
    input: String,

    /// Requested quality code (e.g. 116 for 1080P60). Falls back to the
    /// closest available tier.
    #[arg(short, long)]
    quality: Option<u32>,

    /// What to produce.
    #[arg(short, long, value_enum, default_value = "merged")]
    mode: Mode,

    /// Output container for merged mode.
    #[arg(short, long, default_value = "mp4")]
    container: String,

    /// Directory the finished file is moved into.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Print resolved metadata as JSON and exit without downloading.
    #[arg(long)]
    info: bool,

    /// SESSDATA cookie value for elevated tiers.
    #[arg(long, env = "BGET_SESSDATA")]
    sessdata: Option<String>,

    /// bili_jct cookie value.
    #[arg(long, env = "BGET_BILI_JCT", default_value = "")]
    bili_jct: String,

    /// DedeUserID cookie value.
    #[arg(long, env = "BGET_DEDE_USER_ID", default_value = "")]
    dede_user_id: String,
}

#[tokio::main]
async fn main() {
    bget::logging::init();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> bget::Result<()> {
    let container = Container::from_name(&args.container)
        .ok_or_else(|| bget::Error::Other(format!("unsupported container: {}", args.container)))?;
    let delivery = match args.mode {
        Mode::Merged => DeliveryKind::Merged(container),
        Mode::Audio => DeliveryKind::AudioOnly,
        Mode::Video => DeliveryKind::VideoOnly,
    };
    let credential = args.sessdata.map(|sessdata| {
        Credential::new(sessdata, args.bili_jct.clone(), args.dede_user_id.clone())
    });

    let client = default_client();
    let api = ApiClient::new(client.clone());
    let keys = Arc::new(KeyCache::new(api.clone()));
    let signed = SignedApi::new(api, keys);
    let source = Arc::new(BiliSource::new(
        AssetResolver::new(signed.clone()),
        PlaybackNegotiator::new(signed),
    ));

    let config = AppConfig::default();
    let runner: Arc<TokioProcessRunner> = Arc::new(TokioProcessRunner);
    let orchestrator = Orchestrator::new(
        config.clone(),
        source,
        StreamFetcher::new(client, DEFAULT_UA).with_timeout(config.fetch_timeout),
        Muxer::new(config.ffmpeg_path.clone(), runner.clone()),
        MetadataProbe::new(config.ytdlp_path.clone(), runner),
    );

    if args.info {
        let description = orchestrator.describe(&args.input, credential.as_ref()).await?;
        println!("{}", serde_json::to_string_pretty(&description)?);
        return Ok(());
    }

    let requested = args.quality.map(QualityTier).unwrap_or(DEFAULT_TIER);
    let id = orchestrator.start(DownloadRequest {
        input: args.input,
        requested_tier: requested,
        delivery,
        credential,
        naming: bget::NamingPolicy::Title,
    });

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snap = orchestrator.progress(&id);
        match &snap.status {
            TaskStatus::Completed => break,
            TaskStatus::Error { message } => {
                return Err(bget::Error::Other(message.clone()));
            }
            TaskStatus::Cancelled | TaskStatus::Unknown => {
                return Err(bget::Error::Other("task did not complete".to_string()));
            }
            status => {
                info!(
                    stage = status.stage_label(),
                    percent = format!("{:.1}", snap.stage_percent()),
                    "working"
                );
            }
        }
    }

    let output = orchestrator.take_output(&id)?;
    let final_path = args.output_dir.join(&output.filename);
    tokio::fs::create_dir_all(&args.output_dir).await?;
    tokio::fs::copy(&output.path, &final_path).await?;
    info!(path = %final_path.display(), "saved");
    println!("{}", final_path.display());
    Ok(())
}
