use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dftk_core::{
    digest_paths, inspect_path, AbuseIpdbClient, DigestEngine, DigestResult, FileHandle,
    Inspection, InspectorConfig, MetadataResult, ReputationProvider, Verdict,
};

/// Files smaller than this are hashed without a progress bar.
const PROGRESS_THRESHOLD: u64 = 64 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "dftk", version, about = "Digital Forensics Toolkit - file digests, metadata and IP reputation")]
struct Cli {
    /// Config file (default: $DFTK_CONFIG or the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute MD5, SHA-256 and size of files
    Hash {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Expected MD5 or SHA-256 (hex) to verify a single file against
        #[arg(long)]
        expect: Option<String>,
    },
    /// Extract EXIF or audio tag metadata from a file
    Meta { file: PathBuf },
    /// Hash and extract metadata in one go
    Inspect { file: PathBuf },
    /// Look up the abuse reputation of an IP address or URL
    Lookup { target: String },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "dftk_core=debug,dftk=debug",
        _ => "dftk_core=trace,dftk=trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = InspectorConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Command::Hash { files, expect } => run_hash(&files, expect.as_deref(), &config, cli.json),
        Command::Meta { file } => run_meta(&file, &config, cli.json),
        Command::Inspect { file } => run_inspect(&file, &config, cli.json),
        Command::Lookup { target } => run_lookup(&target, &config, cli.json),
    }
}

fn run_hash(
    files: &[PathBuf],
    expect: Option<&str>,
    config: &InspectorConfig,
    json: bool,
) -> anyhow::Result<ExitCode> {
    if expect.is_some() && files.len() != 1 {
        anyhow::bail!("--expect needs exactly one file");
    }

    let results = if files.len() == 1 {
        vec![(files[0].clone(), hash_with_progress(&files[0], config, json))]
    } else {
        digest_paths(files, config)
            .into_iter()
            .map(|(path, r)| (path, r.map_err(anyhow::Error::from)))
            .collect()
    };

    let mut failed = false;
    for (path, result) in &results {
        match result {
            Ok(digest) => {
                let verdict = expect.map(|e| digest.verify(e));
                if matches!(verdict, Some(Verdict::Mismatch(_) | Verdict::Unrecognized)) {
                    failed = true;
                }
                if json {
                    println!(
                        "{}",
                        json!({ "path": path, "digest": digest, "verify": verdict })
                    );
                } else {
                    print_digest(path, digest);
                    if let Some(v) = verdict {
                        print_verdict(v);
                    }
                }
            }
            Err(e) => {
                failed = true;
                warn!(path = %path.display(), "hashing failed");
                if json {
                    println!("{}", json!({ "path": path, "error": format!("{e:#}") }));
                } else {
                    eprintln!("{}: {e:#}", path.display());
                }
            }
        }
    }

    Ok(exit_code(!failed))
}

fn hash_with_progress(
    path: &Path,
    config: &InspectorConfig,
    quiet: bool,
) -> anyhow::Result<DigestResult> {
    let mut handle = FileHandle::open(path)?;
    let engine = DigestEngine::new(config.digest.chunk_size);
    if quiet || handle.declared_len() < PROGRESS_THRESHOLD {
        return Ok(engine.digest(&mut handle)?);
    }

    let pb = ProgressBar::new(handle.declared_len());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}) hashing")?,
    );
    let result = engine.digest_with_progress(&mut handle, &|_stage, current, _total| {
        pb.set_position(current);
    });
    pb.finish_and_clear();
    Ok(result?)
}

fn print_digest(path: &Path, digest: &DigestResult) {
    println!("{}", path.display());
    println!("  MD5 Hash:    {}", digest.md5_hex());
    println!("  SHA256 Hash: {}", digest.sha256_hex());
    println!("  File Size:   {} bytes", digest.size_bytes);
}

fn print_verdict(verdict: Verdict) {
    match verdict {
        Verdict::Match(alg) => println!("  Verify:      OK ({alg} matches)"),
        Verdict::Mismatch(alg) => println!("  Verify:      MISMATCH ({alg} differs)"),
        Verdict::Unrecognized => {
            println!("  Verify:      expected value is neither an MD5 nor a SHA-256 hex digest")
        }
    }
}

fn run_meta(path: &Path, config: &InspectorConfig, json: bool) -> anyhow::Result<ExitCode> {
    let mut handle = FileHandle::open(path)?;
    let container = dftk_core::sniff::sniff_source(&mut handle);
    let class = dftk_core::sniff::resolve_class(container, handle.declared_type());
    let metadata = dftk_core::extract_metadata(&mut handle, class, config.decode.max_decode_bytes)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if json {
        println!(
            "{}",
            json!({ "path": path, "container": container, "class": class, "metadata": metadata })
        );
    } else {
        println!("{} ({container})", path.display());
        print_metadata(&metadata);
    }
    Ok(exit_code(has_metadata(&metadata)))
}

fn run_inspect(path: &Path, config: &InspectorConfig, json: bool) -> anyhow::Result<ExitCode> {
    let Inspection {
        path,
        container,
        class,
        digest,
        metadata,
    } = inspect_path(path, config);

    if json {
        let digest = match &digest {
            Ok(d) => json!(d),
            Err(e) => json!({ "error": e.to_string() }),
        };
        let meta = match &metadata {
            Ok(m) => json!(m),
            Err(e) => json!({ "error": e.to_string() }),
        };
        println!(
            "{}",
            json!({ "path": path, "container": container, "class": class, "digest": digest, "metadata": meta })
        );
    } else {
        match &digest {
            Ok(d) => print_digest(&path, d),
            Err(e) => eprintln!("{}: {e}", path.display()),
        }
        println!("  Type:        {container} ({class})");
        match &metadata {
            Ok(m) => print_metadata(m),
            Err(e) => eprintln!("  metadata: {e}"),
        }
    }

    Ok(exit_code(digest.is_ok() && metadata.as_ref().is_ok_and(has_metadata)))
}

fn print_metadata(metadata: &MetadataResult) {
    match metadata {
        MetadataResult::Image(tags) => {
            println!("  Extracted Metadata:");
            for (name, value) in tags {
                println!("    {name}: {value}");
            }
        }
        MetadataResult::Audio(tags) => {
            let or_na = |v: Option<&str>| v.unwrap_or("N/A").to_string();
            println!("  Extracted Metadata:");
            println!("    title: {}", or_na(tags.title.as_deref()));
            println!("    artist: {}", or_na(tags.artist.as_deref()));
            println!("    album: {}", or_na(tags.album.as_deref()));
            println!(
                "    year: {}",
                tags.year.map_or_else(|| "N/A".to_string(), |y| y.to_string())
            );
        }
        MetadataResult::Unsupported => {
            println!("  Unsupported file type. Please provide an image or audio file.")
        }
        MetadataResult::ParseError(reason) => println!("  Could not extract metadata: {reason}"),
    }
}

fn has_metadata(metadata: &MetadataResult) -> bool {
    matches!(metadata, MetadataResult::Image(_) | MetadataResult::Audio(_))
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_lookup(target: &str, config: &InspectorConfig, json: bool) -> anyhow::Result<ExitCode> {
    let client = AbuseIpdbClient::new(&config.reputation)?;
    let record = client
        .lookup(target)
        .with_context(|| format!("reputation lookup for {target} failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("IP Address:       {}", record.ip_address);
        println!("Public:           {}", record.is_public);
        println!("Abuse Confidence: {}%", record.abuse_confidence_score);
        println!("Country:          {}", record.country_code.as_deref().unwrap_or("N/A"));
        println!("ISP:              {}", record.isp.as_deref().unwrap_or("N/A"));
        println!("Domain:           {}", record.domain.as_deref().unwrap_or("N/A"));
        println!("Total Reports:    {}", record.total_reports);
        if let Some(usage) = &record.usage_type {
            println!("Usage Type:       {usage}");
        }
        if let Some(last) = &record.last_reported_at {
            println!("Last Reported:    {last}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hash_with_expect() {
        let cli = Cli::try_parse_from(["dftk", "--json", "hash", "a.bin", "--expect", "abc"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Hash { files, expect } => {
                assert_eq!(files, vec![PathBuf::from("a.bin")]);
                assert_eq!(expect.as_deref(), Some("abc"));
            }
            _ => panic!("expected hash"),
        }
    }

    #[test]
    fn test_hash_requires_files() {
        assert!(Cli::try_parse_from(["dftk", "hash"]).is_err());
    }

    #[test]
    fn test_has_metadata() {
        assert!(!has_metadata(&MetadataResult::Unsupported));
        assert!(has_metadata(&MetadataResult::Audio(Default::default())));
    }
}
