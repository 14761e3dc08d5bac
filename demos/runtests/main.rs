use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, ensure, Context as _};
use filetime::FileTime;
use nfs4_client::{is_kind, ClientConfig, Context, ErrorKind, NfsClient};

const SCALE_CLIENTS: usize = 40;
const UPLOAD_SIZE: usize = 5 * 1024 * 1024;
const UPLOAD_TARGET: u64 = 5 * 1024 * 1024 * 1024;
const LARGE_FILE_SIZE: usize = 20 * 1024 * 1024;
const MASS_FILES: usize = 2000;

/// Exercises an NFSv4 server end to end
///
/// `test` runs the correctness checks, `scale` uploads and reads back
/// several gigabytes from many independent clients at once.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("Usage: runtests [scale|test] <NFS-server> <root-path>");
        std::process::exit(1);
    }
    let config = ClientConfig::new(server_address(&args[1])).with_root_path(&args[2]);

    let result = match args[0].as_str() {
        "scale" => {
            println!("Running scalability tests");
            run_scale(config).await
        }
        "test" => {
            println!("Running correctness tests");
            run_tests(config).await
        }
        mode => {
            eprintln!("Unknown test mode: {mode}");
            std::process::exit(3);
        }
    };

    if let Err(err) = result {
        eprintln!("{err:#}");
        std::process::exit(2);
    }
}

fn server_address(server: &str) -> String {
    if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:2049")
    }
}

fn approximately_now(time: FileTime) -> bool {
    let now = FileTime::now().unix_seconds();
    (now - time.unix_seconds()).abs() < 10 * 60
}

async fn run_tests(config: ClientConfig) -> anyhow::Result<()> {
    let ctx = Context::new();
    let client = NfsClient::connect(&ctx, config).await.context("connecting")?;
    let result = correctness(&client, &ctx).await;
    let cleanup = client.remove_recursive(&ctx, "tests").await;
    client.close(&ctx).await?;
    result?;
    cleanup.context("after test cleanup")?;
    println!("All tests passed");
    Ok(())
}

async fn correctness(client: &NfsClient, ctx: &Context) -> anyhow::Result<()> {
    println!("Removing old files");
    client.remove_recursive(ctx, "tests").await?;

    println!("Checking directories");
    client.make_path(ctx, "tests/directory/a").await?;
    client.make_path(ctx, "tests/directory/a").await.context("make_path is not idempotent")?;

    let info = client.get_file_info(ctx, "tests/directory/a").await?;
    ensure!(info.is_dir, "tests/directory/a is not a directory");
    ensure!(info.name == "a", "unexpected name {:?}", info.name);
    ensure!(approximately_now(info.mtime), "mtime is off: {:?}", info.mtime);

    client.delete_file(ctx, "tests/directory/a").await?;
    match client.get_file_info(ctx, "tests/directory/a").await {
        Err(err) if is_kind(&err, ErrorKind::NotFound) => {}
        other => bail!("deleted directory is still there: {other:?}"),
    }
    match client.delete_file(ctx, "tests").await {
        Err(err) if is_kind(&err, ErrorKind::NotEmpty) => {}
        other => bail!("deleting a non-empty directory: {other:?}"),
    }

    println!("Checking file operations");
    let data = vec![b'a'; LARGE_FILE_SIZE];
    let written = client.rewrite_file(ctx, "tests/file1", &mut data.as_slice()).await?;
    ensure!(written == data.len() as u64, "wrote {written} bytes");

    let mut back = Vec::with_capacity(data.len());
    let read = client.read_file_all(ctx, "tests/file1", &mut back).await?;
    ensure!(read == data.len() as u64 && back == data, "read back differs ({read} bytes)");

    let info = client.get_file_info(ctx, "tests/file1").await?;
    ensure!(info.size == data.len() as u64, "size is {}", info.size);
    ensure!(info.name == "file1" && !info.is_dir, "unexpected info {info:?}");
    ensure!(approximately_now(info.mtime), "mtime is off: {:?}", info.mtime);

    client.delete_file(ctx, "tests/file1").await?;
    match client.get_file_info(ctx, "tests/file1").await {
        Err(err) if is_kind(&err, ErrorKind::NotFound) => {}
        other => bail!("deleted file is still there: {other:?}"),
    }
    match client.read_file_all(ctx, "tests/file1", &mut Vec::new()).await {
        Err(err) if is_kind(&err, ErrorKind::NotFound) => {}
        other => bail!("read of a deleted file: {other:?}"),
    }

    println!("Checking mass operations");
    client.make_path(ctx, "tests/mass").await?;
    for i in 0..MASS_FILES {
        client.rewrite_file(ctx, &format!("tests/mass/file-{i}"), &mut &b"aaaaaaa"[..]).await?;
    }
    let list = client.get_file_list(ctx, "tests/mass").await?;
    ensure!(list.len() == MASS_FILES, "listed {} files", list.len());
    let mut seen = vec![false; MASS_FILES];
    for entry in &list {
        ensure!(!entry.is_dir && entry.size == 7, "unexpected entry {entry:?}");
        let index = entry
            .name
            .strip_prefix("file-")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n < MASS_FILES)
            .with_context(|| format!("unexpected name {:?}", entry.name))?;
        seen[index] = true;
    }
    ensure!(seen.iter().all(|&s| s), "some files are missing from the listing");
    Ok(())
}

/// xorshift64, enough to keep servers from deduplicating the payload
fn random_data(len: usize) -> Vec<u8> {
    let seed =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(1);
    let mut state = seed | 1;
    let mut data = Vec::with_capacity(len + 8);
    while data.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        data.extend_from_slice(&state.to_le_bytes());
    }
    data.truncate(len);
    data
}

fn report(what: &str, bytes: u64, elapsed: Duration) {
    let ms = elapsed.as_millis().max(1) as u64;
    let rate = (bytes as f64 * 1000.0 / ms as f64) / 1024.0 / 1024.0;
    println!("{what} bytes: {bytes}, time(ms): {ms}, rate (MB/s): {}", rate as u64);
}

async fn run_scale(config: ClientConfig) -> anyhow::Result<()> {
    let ctx = Context::new();
    let mut clients = Vec::with_capacity(SCALE_CLIENTS);
    for _ in 0..SCALE_CLIENTS {
        clients.push(Arc::new(NfsClient::connect(&ctx, config.clone()).await?));
    }

    println!("Removing old files");
    clients[0].remove_recursive(&ctx, "scale").await?;
    clients[0].make_path(&ctx, "scale").await?;

    let data = Arc::new(random_data(UPLOAD_SIZE));
    let result = match scale_writes(&clients, &data).await {
        Ok(uploaded) => scale_reads(&clients, &data, uploaded).await,
        Err(err) => Err(err),
    };

    println!("After test cleanup");
    let cleanup = clients[0].remove_recursive(&ctx, "scale").await;
    for client in &clients {
        client.close(&ctx).await?;
    }
    result?;
    cleanup?;
    Ok(())
}

/// Uploads copies of `data` from every client until the target volume is
/// reached, returning the number of files written.
async fn scale_writes(clients: &[Arc<NfsClient>], data: &Arc<Vec<u8>>) -> anyhow::Result<u64> {
    let done = Arc::new(AtomicBool::new(false));
    let uploaded = Arc::new(AtomicU64::new(0));
    let count = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    println!("Running the upload test. Clients = {}", clients.len());
    let mut tasks = Vec::with_capacity(clients.len());
    for client in clients {
        let (client, data) = (Arc::clone(client), Arc::clone(data));
        let (done, uploaded, count) =
            (Arc::clone(&done), Arc::clone(&uploaded), Arc::clone(&count));
        tasks.push(tokio::spawn(async move {
            let ctx = Context::new();
            while !done.load(Ordering::Acquire) {
                let name = format!("scale/test-{}", count.fetch_add(1, Ordering::AcqRel) + 1);
                let written = match client.rewrite_file(&ctx, &name, &mut data.as_slice()).await {
                    Ok(written) => written,
                    Err(err) => {
                        done.store(true, Ordering::Release);
                        return Err(anyhow::Error::new(err).context(name));
                    }
                };
                let total = uploaded.fetch_add(written, Ordering::AcqRel) + written;
                if total > UPLOAD_TARGET && !done.swap(true, Ordering::AcqRel) {
                    report("Uploaded", total, start.elapsed());
                }
            }
            Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }
    Ok(count.load(Ordering::Acquire))
}

/// Reads back the uploaded files from every client and compares them with
/// `data` until the target volume is reached.
async fn scale_reads(
    clients: &[Arc<NfsClient>],
    data: &Arc<Vec<u8>>,
    files: u64,
) -> anyhow::Result<()> {
    let done = Arc::new(AtomicBool::new(false));
    let downloaded = Arc::new(AtomicU64::new(0));
    let count = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    println!("Running the read test. Clients = {}", clients.len());
    let mut tasks = Vec::with_capacity(clients.len());
    for client in clients {
        let (client, data) = (Arc::clone(client), Arc::clone(data));
        let (done, downloaded, count) =
            (Arc::clone(&done), Arc::clone(&downloaded), Arc::clone(&count));
        tasks.push(tokio::spawn(async move {
            let ctx = Context::new();
            let mut buf = Vec::with_capacity(data.len());
            while !done.load(Ordering::Acquire) {
                let n = count.fetch_add(1, Ordering::AcqRel) % files.max(1) + 1;
                let name = format!("scale/test-{n}");
                buf.clear();
                let read = match client.read_file_all(&ctx, &name, &mut buf).await {
                    Ok(read) => read,
                    Err(err) => {
                        done.store(true, Ordering::Release);
                        return Err(anyhow::Error::new(err).context(name));
                    }
                };
                if buf[..] != data[..] {
                    done.store(true, Ordering::Release);
                    bail!("data mismatch in {name}");
                }
                let total = downloaded.fetch_add(read, Ordering::AcqRel) + read;
                if total > UPLOAD_TARGET && !done.swap(true, Ordering::AcqRel) {
                    report("Downloaded", total, start.elapsed());
                }
            }
            Ok(())
        }));
    }
    for task in tasks {
        task.await??;
    }
    Ok(())
}
