use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wiisave::friend_code::{checksum_digest, parse_friend_code, FriendCode};
use wiisave::{BlockRepository, FileBlockRepository, SaveFile};

#[derive(Parser)]
#[command(name = "wiisave", about = "Inspect Mii databases, save licenses and friend codes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the friend code for a profile id (decimal or 0x-prefixed hex)
    Derive {
        pid: String,
    },
    /// Parse a friend code and check its checksum
    Parse {
        code: String,
    },
    /// List the Mii records in an RFL_DB.dat
    Blocks {
        db: PathBuf,
        /// Include empty slots
        #[arg(short, long)]
        all: bool,
    },
    /// List the licenses in an rksys.dat
    Licenses {
        save: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Recompute and store the CRC of an rksys.dat
    FixCrc {
        save: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Derive ───────────────────────────────────────────────────────────
        Commands::Derive { pid } => {
            let pid = parse_pid(&pid)?;
            match FriendCode::from_pid(pid) {
                Some(code) => {
                    println!("{code}");
                    println!("  pid     {pid:08x}");
                    println!("  digest  {}", hex::encode(checksum_digest(pid)));
                }
                None => println!("(no friend code: pid is zero)"),
            }
        }

        // ── Parse ────────────────────────────────────────────────────────────
        Commands::Parse { code } => {
            let code = FriendCode::from_value(parse_friend_code(&code)?);
            println!("{code}");
            println!("  value   {}", code.value());
            println!("  pid     {:08x}", code.pid());
            println!("  valid   {}", code.is_valid());
        }

        // ── Blocks ───────────────────────────────────────────────────────────
        Commands::Blocks { db, all } => {
            let mut repo = FileBlockRepository::new(&db);
            if !repo.exists() {
                return Err(format!("Mii database not found: {}", db.display()).into());
            }
            let blocks = repo.load_all_blocks();
            println!("Database: {}", db.display());
            println!("{:>4}  {:<10}  Name", "Slot", "Client id");
            for (slot, block) in blocks.iter().enumerate() {
                if block.is_empty() && !all {
                    continue;
                }
                println!("{:>4}  {:08x}    {}", slot, block.client_id(), block.name());
            }
        }

        // ── Licenses ─────────────────────────────────────────────────────────
        Commands::Licenses { save, json } => {
            let licenses = SaveFile::open(&save)?.licenses();
            if json {
                println!("{}", serde_json::to_string_pretty(&licenses)?);
                return Ok(());
            }
            for license in &licenses {
                let fc = license.friend_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                println!("[{}] {:<10}  {}  VR {:>5}  BR {:>5}  races {}  wins {}",
                    license.index, license.name, fc, license.vr, license.br,
                    license.race_count, license.win_count);
                for friend in &license.friends {
                    let fc = friend.friend_code.map(|c| c.to_string()).unwrap_or_default();
                    println!("      {:<10}  {}  W/L {}/{}", friend.mii_name, fc, friend.wins, friend.losses);
                }
            }
        }

        // ── FixCrc ───────────────────────────────────────────────────────────
        Commands::FixCrc { save } => {
            let mut file = SaveFile::open(&save)?;
            let before = file.stored_crc();
            file.write_to(&save)?;
            println!("CRC {:08x} -> {:08x}", before, file.stored_crc());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_pid(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}
