//! # CLI - database admin tool
//!
//! Offline maintenance for database file triplets. Every operation here
//! works on closed files; the tool never opens a store for writing.
//!
//! ## Commands
//!
//! ```text
//! info <file>...                     Identify files and print their headers
//! recover <dat> <key> <log>          Roll back an interrupted epoch
//! rekey <dat> <key> <count>          Rebuild the key file from the data file
//!     [--block=N] [--load=F] [--buffer=N]
//! verify <dat> <key> [--buffer=N]    Check integrity and print statistics
//! visit <dat>                        Count records, histogram value sizes
//! help                               Print usage
//! ```
//!
//! Options use `--name=value` form. `--buffer` is a scan/window buffer in
//! bytes: bigger is faster, and a rekey buffer the size of the key file
//! finishes in one pass over the data.

use anyhow::{anyhow, bail, Context, Result};

use format::{DatHeader, KeyHeader, LogHeader};
use hash::XxHasher;
use store::VerifyInfo;
use vfs::{File, OpenMode, OsFile};

/// Default scan buffer: 1 MiB.
const READ_SIZE: usize = 1024 * 1024;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        eprintln!("nudb: {e:#}");
        eprintln!("Use 'nudb help' for usage.");
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let (positional, options) = split_options(args)?;
    let Some(command) = positional.first() else {
        help();
        return Ok(());
    };

    match command.as_str() {
        "help" => {
            help();
            Ok(())
        }
        "info" => {
            if positional.len() < 2 {
                bail!("info: no files specified");
            }
            for path in &positional[1..] {
                info(path);
            }
            Ok(())
        }
        "recover" => {
            let [dat, key, log] = paths::<3>(&positional[1..], "recover <dat> <key> <log>")?;
            store::recover::<XxHasher, OsFile, _>(dat, key, log)
                .with_context(|| "recovery failed")?;
            println!("recovered");
            Ok(())
        }
        "rekey" => {
            let [dat, key, count] =
                paths::<3>(&positional[1..], "rekey <dat> <key> <count>")?;
            let count: u64 = count.parse().context("rekey: item count must be a number")?;
            let block = option_num(&options, "block")?.unwrap_or(4096) as u16;
            let load = option_float(&options, "load")?.unwrap_or(0.5);
            let buffer = option_num(&options, "buffer")?.unwrap_or(READ_SIZE as u64) as usize;
            store::rekey::<XxHasher, OsFile, _>(dat, key, count, block, load, buffer)
                .with_context(|| "rekey failed")?;
            println!("rekeyed {} items", num(count));
            Ok(())
        }
        "verify" => {
            let [dat, key] = paths::<2>(&positional[1..], "verify <dat> <key>")?;
            let buffer = option_num(&options, "buffer")?.unwrap_or(READ_SIZE as u64) as usize;
            let vi = store::verify::<XxHasher, OsFile, _>(dat, key, buffer)
                .with_context(|| "verify failed")?;
            print_verify(&vi);
            Ok(())
        }
        "visit" => {
            let [dat] = paths::<1>(&positional[1..], "visit <dat>")?;
            let mut items = 0u64;
            let mut hist = [0u64; 64];
            store::visit::<OsFile, _, _>(dat, READ_SIZE, |_key, value| {
                items += 1;
                hist[value.len().ilog2() as usize] += 1;
                true
            })
            .with_context(|| "visit failed")?;
            println!("data file:       {dat}");
            println!("items:           {}", num(items));
            println!("size histogram:  {}", hist_string(&hist));
            Ok(())
        }
        other => bail!("unknown command '{other}'"),
    }
}

fn help() {
    println!(
        "usage: nudb <command> [file...] [--option=value]\n\
         \n\
         Commands:\n\
         \n\
             help\n\
                 Print this help information.\n\
         \n\
             info <file>...\n\
                 Show header information for database files.\n\
         \n\
             recover <dat-path> <key-path> <log-path>\n\
                 Perform a database recovery. Always recover first if a log\n\
                 file is present.\n\
         \n\
             rekey <dat-path> <key-path> <count> [--block=N] [--load=F] [--buffer=N]\n\
                 Generate a key file for a data file. The count of items can\n\
                 be calculated with the 'visit' command. A buffer the size of\n\
                 the key file processes in a single pass.\n\
         \n\
             verify <dat-path> <key-path> [--buffer=N]\n\
                 Verify database integrity and print statistics.\n\
         \n\
             visit <dat-path>\n\
                 Iterate a data file: item count and a histogram of value\n\
                 sizes by power of two."
    );
}

/// Prints what a file is and what its header says, never failing the whole
/// run over one unreadable path.
fn info(path: &str) {
    match read_info(path) {
        Ok(text) => println!("{text}"),
        Err(e) => println!("{path}: {e:#}"),
    }
}

fn read_info(path: &str) -> Result<String> {
    let f = OsFile::open(OpenMode::Read, path)?;
    let size = f.size()?;
    if size < 8 {
        bail!("too small to be a database file");
    }
    let mut tag = [0u8; 8];
    f.read_at(0, &mut tag)?;

    let text = match &tag {
        b"nudb.dat" => {
            let h = DatHeader::read(&f)?;
            format!(
                "data file:       {path}\n\
                 file size:       {}\n\
                 version:         {}\n\
                 uid:             {:#018x}\n\
                 appnum:          {:#018x}\n\
                 key_size:        {}\n",
                num(size),
                h.version,
                h.uid,
                h.appnum,
                h.key_size
            )
        }
        b"nudb.key" => {
            let h = KeyHeader::read(&f)?;
            format!(
                "key file:        {path}\n\
                 file size:       {}\n\
                 version:         {}\n\
                 uid:             {:#018x}\n\
                 appnum:          {:#018x}\n\
                 key_size:        {}\n\
                 salt:            {:#018x}\n\
                 pepper:          {:#018x}\n\
                 block_size:      {}\n\
                 load_factor:     {:.2}\n\
                 buckets:         {}\n\
                 modulus:         {}\n",
                num(size),
                h.version,
                h.uid,
                h.appnum,
                h.key_size,
                h.salt,
                h.pepper,
                num(h.block_size as u64),
                h.load_factor as f64 / 65536.0,
                num(h.buckets),
                num(h.modulus)
            )
        }
        b"nudb.log" => {
            let h = LogHeader::read(&f)?;
            format!(
                "log file:        {path}\n\
                 file size:       {}\n\
                 version:         {}\n\
                 uid:             {:#018x}\n\
                 appnum:          {:#018x}\n\
                 key_size:        {}\n\
                 salt:            {:#018x}\n\
                 pepper:          {:#018x}\n\
                 block_size:      {}\n\
                 key_file_size:   {}\n\
                 dat_file_size:   {}\n",
                num(size),
                h.version,
                h.uid,
                h.appnum,
                h.key_size,
                h.salt,
                h.pepper,
                num(h.block_size as u64),
                num(h.key_file_size),
                num(h.dat_file_size)
            )
        }
        other => bail!("unknown type '{}'", String::from_utf8_lossy(other)),
    };
    Ok(text)
}

fn print_verify(vi: &VerifyInfo) {
    println!("version:         {}", vi.version);
    println!("uid:             {:#018x}", vi.uid);
    println!("appnum:          {:#018x}", vi.appnum);
    println!("key_size:        {}", vi.key_size);
    println!("salt:            {:#018x}", vi.salt);
    println!("pepper:          {:#018x}", vi.pepper);
    println!("block_size:      {}", num(vi.block_size as u64));
    println!("load_factor:     {:.0}%", vi.load_factor * 100.0);
    println!("capacity:        {}", num(vi.capacity as u64));
    println!("buckets:         {}", num(vi.buckets));
    println!("key_count:       {}", num(vi.key_count));
    println!("value_count:     {}", num(vi.value_count));
    println!("value_bytes:     {}", num(vi.value_bytes));
    println!("spill_count:     {}", num(vi.spill_count));
    println!("spill_count_tot: {}", num(vi.spill_count_tot));
    println!("spill_bytes:     {}", num(vi.spill_bytes));
    println!("spill_bytes_tot: {}", num(vi.spill_bytes_tot));
    println!("avg_fetch:       {:.3}", vi.avg_fetch);
    println!("waste:           {:.3}%", vi.waste * 100.0);
    println!("overhead:        {:.1}%", vi.overhead * 100.0);
    println!("actual_load:     {:.0}%", vi.actual_load * 100.0);
    println!("key_file_size:   {}", num(vi.key_file_size));
    println!("dat_file_size:   {}", num(vi.dat_file_size));
    println!("hist:            {}", hist_string(&vi.hist));
}

/// Splits `--name=value` options from positional arguments.
fn split_options(args: &[String]) -> Result<(Vec<String>, Vec<(String, String)>)> {
    let mut positional = Vec::new();
    let mut options = Vec::new();
    for arg in args {
        if let Some(rest) = arg.strip_prefix("--") {
            let (name, value) = rest
                .split_once('=')
                .ok_or_else(|| anyhow!("option '{arg}' needs '=value'"))?;
            options.push((name.to_string(), value.to_string()));
        } else {
            positional.push(arg.clone());
        }
    }
    Ok((positional, options))
}

fn paths<'a, const N: usize>(args: &'a [String], usage: &str) -> Result<[&'a str; N]> {
    if args.len() < N {
        bail!("usage: nudb {usage}");
    }
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str();
    }
    Ok(out)
}

fn option_num(options: &[(String, String)], name: &str) -> Result<Option<u64>> {
    match options.iter().find(|(n, _)| n == name) {
        Some((_, v)) => Ok(Some(
            v.parse()
                .with_context(|| format!("--{name} must be a number"))?,
        )),
        None => Ok(None),
    }
}

fn option_float(options: &[(String, String)], name: &str) -> Result<Option<f64>> {
    match options.iter().find(|(n, _)| n == name) {
        Some((_, v)) => Ok(Some(
            v.parse()
                .with_context(|| format!("--{name} must be a number"))?,
        )),
        None => Ok(None),
    }
}

/// Formats an integer with thousands separators.
fn num(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Renders a histogram up to its last nonzero bin.
fn hist_string(hist: &[u64]) -> String {
    let last = hist.iter().rposition(|&v| v != 0).unwrap_or(0);
    hist[..=last]
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
