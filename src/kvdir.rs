use kvdir::logger::Logger;
use kvdir::{Config, Directory};
use std::io::{Read, Write};
use std::str::FromStr;
use tokio::signal::unix::{signal, SignalKind};

fn usage() -> ! {
    let prog = std::env::args().next().unwrap_or("kvdir".to_string());
    eprintln!("{} <config.toml|-> <command> [args]", prog);
    eprintln!("  ls");
    eprintln!("  len <name>");
    eprintln!("  put <name> <local_file|->");
    eprintln!("  get <name> [local_file]");
    eprintln!("  rm <name>");
    eprintln!("  mv <src> <dst>");
    eprintln!("  lock <name>        hold the lock until interrupted");
    std::process::exit(1);
}

fn load_config(path: &str) -> kvdir::Result<Config> {
    if path == "-" {
        return Ok(Config::default());
    }
    Config::from_file(path)
}

fn put(dir: &Directory, name: &str, src: &str) -> kvdir::Result<()> {
    let mut data = Vec::new();
    if src == "-" {
        std::io::stdin().read_to_end(&mut data)?;
    } else {
        std::fs::File::open(src)?.read_to_end(&mut data)?;
    }
    let mut out = dir.create_output(name)?;
    out.write_bytes(&data)?;
    out.close()?;
    println!("{} {} bytes crc32 {:08x}", name, out.file_pointer(), out.checksum());
    Ok(())
}

fn get(dir: &Directory, name: &str, dst: Option<&str>) -> kvdir::Result<()> {
    let mut input = dir.open_input(name)?;
    match dst {
        Some(path) => {
            let mut f = std::fs::File::create(path)?;
            std::io::copy(&mut input, &mut f)?;
        }
        None => {
            let mut out = std::io::stdout().lock();
            std::io::copy(&mut input, &mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

async fn hold_lock(dir: &Directory, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut lock = dir.obtain_lock(name)?;
    println!("lock {} held, token {}", lock.name(), lock.token());
    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sig_int.recv() => {},
        _ = sig_term.recv() => {},
    }
    lock.ensure_valid()?;
    lock.release()?;
    println!("lock {} released", name);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = std::env::var("KVDIR_LEVEL").unwrap_or("WARN".to_string());
    let logger = Logger::init();
    if let Ok(path) = std::env::var("KVDIR_LOG") {
        logger.add_file(&path, false);
    }
    log::set_max_level(log::LevelFilter::from_str(&level).unwrap_or(log::LevelFilter::Warn));

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        usage();
    }
    let cfg = match load_config(&args[1]) {
        Ok(c) => c,
        Err(e) => {
            log::error!("can't load config {} error {}", args[1], e);
            std::process::exit(1);
        }
    };
    let dir = Directory::open(&cfg)?;

    let arg = |i: usize| args.get(i).map(|s| s.as_str());
    let r: Result<(), Box<dyn std::error::Error>> = match (args[2].as_str(), arg(3), arg(4)) {
        ("ls", None, None) => dir.list_all().map(|names| names.iter().for_each(|n| println!("{}", n))).map_err(Into::into),
        ("len", Some(name), None) => dir.file_length(name).map(|n| println!("{}", n)).map_err(Into::into),
        ("put", Some(name), Some(src)) => put(&dir, name, src).map_err(Into::into),
        ("get", Some(name), dst) => get(&dir, name, dst).map_err(Into::into),
        ("rm", Some(name), None) => dir.delete_file(name).map_err(Into::into),
        ("mv", Some(src), Some(dst)) => dir.rename(src, dst).map_err(Into::into),
        ("lock", Some(name), None) => hold_lock(&dir, name).await,
        _ => usage(),
    };
    dir.close();

    if let Err(e) = r {
        log::error!("{} failed, error {}", args[2], e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}
