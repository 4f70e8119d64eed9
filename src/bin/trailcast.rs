use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "trailcast", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the encode capability report for this machine.
    Probe,
    /// Composite a single frame of the demo replay as a PNG.
    Frame(FrameArgs),
    /// Export the demo replay as a video (requires `ffmpeg` on PATH).
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Replay progress to render, 0.0 to 1.0.
    #[arg(long, default_value_t = 0.5)]
    progress: f64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Viewport width used for the demo scene.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Viewport height used for the demo scene.
    #[arg(long, default_value_t = 720)]
    height: u32,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Output directory.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Target aspect ratio.
    #[arg(long, value_enum, default_value_t = RatioChoice::Wide)]
    ratio: RatioChoice,

    /// Pipeline mode.
    #[arg(long, value_enum, default_value_t = ModeChoice::TwoPhase)]
    mode: ModeChoice,

    /// Demo replay duration in seconds.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Viewport width used for the demo scene.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Viewport height used for the demo scene.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Font file for overlay text when system fonts are unavailable.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RatioChoice {
    Wide,
    Square,
    Tall,
}

impl From<RatioChoice> for trailcast::AspectRatio {
    fn from(value: RatioChoice) -> Self {
        match value {
            RatioChoice::Wide => trailcast::AspectRatio::Wide,
            RatioChoice::Square => trailcast::AspectRatio::Square,
            RatioChoice::Tall => trailcast::AspectRatio::Tall,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    SinglePass,
    TwoPhase,
    ManualGuide,
}

impl From<ModeChoice> for trailcast::ExportMode {
    fn from(value: ModeChoice) -> Self {
        match value {
            ModeChoice::SinglePass => trailcast::ExportMode::SinglePass,
            ModeChoice::TwoPhase => trailcast::ExportMode::TwoPhase,
            ModeChoice::ManualGuide => trailcast::ExportMode::ManualGuide,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Probe => cmd_probe(),
        Command::Frame(args) => cmd_frame(args),
        Command::Export(args) => cmd_export(args),
    }
}

fn cmd_probe() -> anyhow::Result<()> {
    let report = trailcast::probe::probe();
    eprintln!("ffmpeg available:      {}", report.ffmpeg_available);
    eprintln!("hardware encoder:      {}", report.hardware_encoder);
    eprintln!("layout rasterization:  {}", report.layout_raster_available);
    eprintln!("codec candidates (best first):");
    for c in &report.candidates {
        eprintln!(
            "  {:>16}  {}  tier={:?}{}",
            c.encoder,
            c.container.extension(),
            c.tier,
            if c.hardware { "  (hardware)" } else { "" },
        );
    }
    for rec in &report.recommendations {
        eprintln!("note: {rec}");
    }
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    use trailcast::SceneSource as _;

    let nominal_ms = 10_000.0;
    let mut scene = trailcast::ScriptedScene::new(args.width, args.height, nominal_ms);
    scene.play();
    scene.advance(nominal_ms * args.progress.clamp(0.0, 1.0));

    let dims = trailcast::RecordingDimensions::derive(
        trailcast::Viewport {
            width: args.width,
            height: args.height,
        },
        trailcast::AspectRatio::Wide,
        1.0,
        trailcast::DeviceTier::detect(),
    )?;
    let snapshot = scene.snapshot()?;
    let overlay = scene.overlay();

    let mut compositor =
        trailcast::FrameCompositor::new(&dims, trailcast::CompositorOptions::default());
    let frame = compositor.composite(&snapshot, &overlay)?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

/// Prints progress lines; the library talks to it through `StatusSink`.
#[derive(Default)]
struct StderrStatus {
    last_percent: u8,
}

impl trailcast::StatusSink for StderrStatus {
    fn on_progress(&mut self, progress: &trailcast::Progress) {
        if progress.percent != self.last_percent {
            self.last_percent = progress.percent;
            eprintln!("[{:>3}%] {}", progress.percent, progress.message);
        }
    }

    fn on_notice(&mut self, notice: &str) {
        eprintln!("note: {notice}");
    }

    fn on_outcome(&mut self, outcome: &trailcast::ExportOutcome) {
        match outcome {
            trailcast::ExportOutcome::Completed { file: Some(f) } => {
                eprintln!("wrote {} ({} bytes)", f.path.display(), f.size_bytes);
            }
            trailcast::ExportOutcome::Completed { file: None } => {
                eprintln!("manual guide finished");
            }
            trailcast::ExportOutcome::Cancelled => eprintln!("export cancelled"),
            trailcast::ExportOutcome::Failed { message } => eprintln!("export failed: {message}"),
        }
    }
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let nominal_ms = args.duration_secs.max(1) * 1000;
    let scene = trailcast::ScriptedScene::new(args.width, args.height, nominal_ms as f64)
        .into_shared();

    let opts = trailcast::ExportOptions {
        mode: args.mode.into(),
        aspect_ratio: args.ratio.into(),
        output_dir: args.out_dir,
        tuning: trailcast::CaptureTuning {
            nominal_duration_ms: nominal_ms,
            ..Default::default()
        },
        font_path: args.font,
        ..Default::default()
    };

    let cancel = trailcast::CancelToken::new();
    {
        let cancel = cancel.clone();
        spawn_cancel_watcher(move || cancel.cancel());
        eprintln!("press Enter to cancel");
    }

    let mut session = trailcast::ExportSession::new(scene, opts);
    let mut ticks = trailcast::IntervalTicker::new(60);
    let outcome = session.run(
        &mut trailcast::NullUiHost,
        &mut StderrStatus::default(),
        &mut ticks,
        &cancel,
    );

    match outcome {
        trailcast::ExportOutcome::Failed { message } => anyhow::bail!(message),
        _ => Ok(()),
    }
}

/// Flip the cancel flag when the user presses Enter (or stdin closes). The
/// session notices at its next cooperative check.
fn spawn_cancel_watcher(on_cancel: impl FnOnce() + Send + 'static) {
    let builder = std::thread::Builder::new().name("cancel-watch".into());
    let _ = builder.spawn(move || {
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
        on_cancel();
    });
}
