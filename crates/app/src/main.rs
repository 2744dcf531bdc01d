use std::path::{Path, PathBuf};

use beatreach_core::performance::DeviceHints;
use beatreach_core::session::SessionEvent;
use beatreach_core::store::PlayerSettings;
use beatreach_core::{
    AppConfig, BeatMap, BeatMapGenerator, ClockAudio, Difficulty, EnergyAnalyzer, GameRuntime,
    GameState, JsonFileStore, MotionTracker, PerformanceController, ScoreRecord, ScoreStore,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beatreach_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Generate {
            song,
            bpm,
            duration_ms,
            offset_ms,
            difficulty,
            seed,
            output,
        } => {
            let mut generator = generator_for(seed);
            let beatmap = generator.generate(song, bpm, duration_ms, offset_ms, difficulty)?;
            tracing::info!(targets = beatmap.len(), ?difficulty, "generated beat-map");
            emit(&beatmap.to_json()?, output.as_deref())
        }
        Commands::Analyse {
            input,
            song,
            sample_rate,
            difficulty,
            seed,
            output,
        } => run_analyse(&config, &input, song, sample_rate, difficulty, seed, output.as_deref()),
        Commands::Simulate {
            song,
            bpm,
            duration_ms,
            difficulty,
            seed,
            fps,
            player,
            store,
        } => {
            let beatmap = generator_for(seed).generate(song, bpm, duration_ms, 0, difficulty)?;
            run_simulate(&config, beatmap, seed, fps, &player, store.as_deref())
        }
        Commands::Leaderboard {
            store,
            song,
            difficulty,
            limit,
        } => {
            let store = JsonFileStore::open(&store)?;
            for (rank, record) in store.leaderboard(&song, difficulty, limit)?.iter().enumerate() {
                println!(
                    "{:>3}. {:<16} {:>8}  {:>5.1}%  x{}",
                    rank + 1,
                    record.player,
                    record.score,
                    record.accuracy,
                    record.max_combo
                );
            }
            Ok(())
        }
    }
}

fn generator_for(seed: Option<u64>) -> BeatMapGenerator {
    match seed {
        Some(seed) => BeatMapGenerator::seeded(seed),
        None => BeatMapGenerator::from_entropy(),
    }
}

fn run_analyse(
    config: &AppConfig,
    input: &Path,
    song: Option<String>,
    sample_rate: u32,
    difficulty: Difficulty,
    seed: Option<u64>,
    output: Option<&Path>,
) -> beatreach_core::Result<()> {
    tracing::info!(?input, sample_rate, "analysing raw audio");
    let bytes = std::fs::read(input)?;
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let song = song.unwrap_or_else(|| {
        input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string())
    });

    let mut analyzer = EnergyAnalyzer::new(config.analysis);
    let mut generator = generator_for(seed);
    let beatmap = analyzer.generate_beatmap(song, &samples, sample_rate, difficulty, generator.rng())?;
    tracing::info!(targets = beatmap.len(), bpm = beatmap.bpm, "beat-map built from energy peaks");
    emit(&beatmap.to_json()?, output)
}

fn run_simulate(
    config: &AppConfig,
    beatmap: BeatMap,
    seed: Option<u64>,
    fps: f64,
    player: &str,
    store: Option<&Path>,
) -> beatreach_core::Result<()> {
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
    let frame_time_ms = 1000.0 / fps;

    let mut motion_config = config.motion;
    if let Some(seed) = seed {
        motion_config.synthetic_seed = seed;
    }
    let song_end_ms = beatmap.targets().last().map(|t| t.time_ms).unwrap_or(0) as f64
        + config.judgement.good_window_ms
        + 1000.0;
    let song_id = beatmap.song_id.clone();
    let difficulty = beatmap.difficulty;
    let mut store = store.map(JsonFileStore::open).transpose()?;
    let settings = match &store {
        Some(store) => store.settings()?,
        None => PlayerSettings::default(),
    };

    let mut runtime = GameRuntime::new(
        beatmap,
        config,
        MotionTracker::synthetic(motion_config),
        Box::new(ClockAudio::new(song_end_ms)),
        PerformanceController::new(config.performance, &DeviceHints::detect()),
    );
    runtime.set_audio_offset(settings.audio_offset_ms);
    runtime.session_mut().subscribe(|event| {
        if let SessionEvent::Judged { id, judgement, delta_ms, .. } = event {
            tracing::debug!(id = id.0, ?judgement, delta_ms, "judged");
        }
    });
    runtime.controller_mut().subscribe(|change| {
        tracing::info!(knob = ?change.knob, direction = ?change.direction, fps = change.fps, "quality adjusted");
    });

    runtime.initialize()?;
    runtime.start(0.0)?;

    let limit_ms = config.session.countdown_ms + song_end_ms + 10_000.0;
    let mut wall_ms = 0.0;
    while runtime.session().state() != GameState::Finished && wall_ms <= limit_ms {
        runtime.frame(wall_ms, frame_time_ms);
        wall_ms += frame_time_ms;
    }
    if runtime.session().state() != GameState::Finished {
        runtime.session_mut().notify_audio_ended();
    }

    let stats = *runtime.session().stats();
    runtime.dispose();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(store) = store.as_mut() {
        store.save_score(ScoreRecord::from_stats(song_id, difficulty, player, &stats))?;
        tracing::info!(path = ?store.path(), score = stats.score, "score saved");
    }
    Ok(())
}

fn emit(json: &str, output: Option<&Path>) -> beatreach_core::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(?path, "wrote beat-map");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Hand-tracked rhythm game core", long_about = None)]
struct Cli {
    /// Optional JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a procedural beat-map for a tempo and duration.
    Generate {
        #[arg(long, default_value = "generated")]
        song: String,
        #[arg(long)]
        bpm: f64,
        #[arg(long)]
        duration_ms: u64,
        #[arg(long, default_value_t = 0)]
        offset_ms: u64,
        #[arg(short, long, default_value = "normal")]
        difficulty: Difficulty,
        /// Seed for reproducible output.
        #[arg(long)]
        seed: Option<u64>,
        /// Write the beat-map here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build a beat-map from the energy peaks of raw mono f32 little-endian audio.
    Analyse {
        input: PathBuf,
        #[arg(long)]
        song: Option<String>,
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,
        #[arg(short, long, default_value = "normal")]
        difficulty: Difficulty,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Play a generated map headlessly against synthetic hand input.
    Simulate {
        #[arg(long, default_value = "simulated")]
        song: String,
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        #[arg(long, default_value_t = 30_000)]
        duration_ms: u64,
        #[arg(short, long, default_value = "normal")]
        difficulty: Difficulty,
        #[arg(long)]
        seed: Option<u64>,
        /// Simulated frame rate of the host loop.
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
        #[arg(long, default_value = "player")]
        player: String,
        /// Score file to append the result to.
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print the best scores recorded for a song.
    Leaderboard {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        song: String,
        #[arg(short, long, default_value = "normal")]
        difficulty: Difficulty,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}
