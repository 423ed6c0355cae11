use clap::{App, Arg, ArgMatches, SubCommand};
use bufport::{
    tunnel::{self, BufferSupplier, TunnelEnd},
    BufferAllocator, BufferPayload, Direction, HeapAllocator, PoolAllocator, Port, PortDefinition,
    PortError, Result,
};
use log::{debug, info};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("portsim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Buffer port simulator")
        .subcommand(
            SubCommand::with_name("tunnel")
                .about("Run frames through a tunnel between two components")
                .arg(
                    Arg::with_name("frames")
                        .short("f")
                        .long("frames")
                        .value_name("COUNT")
                        .help("Number of frames to send")
                        .default_value("1000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("buffers")
                        .short("b")
                        .long("buffers")
                        .value_name("COUNT")
                        .help("Actual buffer count on each port")
                        .default_value("4")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("BYTES")
                        .help("Buffer size")
                        .default_value("4096")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("supplier")
                        .long("supplier")
                        .value_name("SIDE")
                        .help("Preferred buffer supplier")
                        .possible_values(&["input", "output", "any"])
                        .default_value("any")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("pool")
                        .long("pool")
                        .help("Back buffers with a fixed-size pool instead of the heap"),
                ),
        )
        .subcommand(
            SubCommand::with_name("queue")
                .about("Exercise checkout and the pending queue on a single port")
                .arg(
                    Arg::with_name("buffers")
                        .short("b")
                        .long("buffers")
                        .value_name("COUNT")
                        .help("Actual buffer count")
                        .default_value("8")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("iterations")
                        .short("i")
                        .long("iterations")
                        .value_name("COUNT")
                        .help("Push/pop rounds")
                        .default_value("100000")
                        .takes_value(true),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("tunnel", Some(sub)) => run_tunnel(sub),
        ("queue", Some(sub)) => run_queue(sub),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_arg(matches: &ArgMatches, name: &str) -> Result<usize> {
    let raw = matches
        .value_of(name)
        .ok_or_else(|| PortError::invalid_argument(name, "missing value"))?;
    raw.parse()
        .map_err(|_| PortError::invalid_argument(name, format!("'{}' is not a number", raw)))
}

fn run_tunnel(matches: &ArgMatches) -> Result<()> {
    let frames = parse_arg(matches, "frames")?;
    let buffers = parse_arg(matches, "buffers")?;
    let size = parse_arg(matches, "size")?;
    let preference = match matches.value_of("supplier") {
        Some("input") => BufferSupplier::Input,
        Some("output") => BufferSupplier::Output,
        _ => BufferSupplier::Unspecified,
    };

    let allocator: Arc<dyn BufferAllocator> = if matches.is_present("pool") {
        Arc::new(PoolAllocator::new(size, buffers, 64)?)
    } else {
        Arc::new(HeapAllocator::new())
    };

    let output = Arc::new(Port::with_name(
        "decoder.out",
        PortDefinition::new(Direction::Output, 1, buffers, size),
    )?);
    let input = Arc::new(Port::with_name(
        "renderer.in",
        PortDefinition::new(Direction::Input, 1, buffers, size),
    )?);

    let supplier_side = tunnel::connect(
        TunnelEnd::new(&output, "decoder", 1),
        TunnelEnd::new(&input, "renderer", 0),
        preference,
    )?;
    let (supplier, non_supplier) = match supplier_side {
        Direction::Output => (&output, &input),
        Direction::Input => (&input, &output),
    };
    let populated = tunnel::populate(supplier, non_supplier, &allocator)?;
    info!(
        "tunnel populated: {} buffers supplied by {}",
        populated,
        supplier.name()
    );

    output.enable();
    input.enable();

    let start = Instant::now();
    let producer = {
        let (output, input) = (Arc::clone(&output), Arc::clone(&input));
        thread::spawn(move || produce(&output, &input, frames, size))
    };
    let consumer = {
        let (output, input) = (Arc::clone(&output), Arc::clone(&input));
        thread::spawn(move || consume(&input, &output, frames))
    };

    let sent = join(producer)?;
    let received = join(consumer)?;
    let elapsed = start.elapsed();

    // Collect whatever the consumer returned after the producer finished.
    while let Some(returned) = output.pop_buffer() {
        output.release_buffer(&returned)?;
    }

    println!("Frames sent: {}, received: {}", sent, received);
    println!(
        "Throughput: {:.0} frames/s",
        received as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("{}: {}", output.name(), output.stats().summary());
    println!("{}: {}", input.name(), input.stats().summary());

    output.disable();
    input.disable();
    let freed = tunnel::depopulate(supplier, non_supplier)?;
    tunnel::disconnect(&output, &input)?;
    debug!("depopulated {} buffers, {} blocks outstanding", freed, allocator.outstanding());
    Ok(())
}

fn produce(output: &Port, input: &Port, frames: usize, size: usize) -> Result<usize> {
    let mut sent = 0;
    while sent < frames {
        while let Some(returned) = output.pop_buffer() {
            output.release_buffer(&returned)?;
        }
        let Some(buffer) = output.allocate_next_buffer() else {
            output.wait_for_buffer(Duration::from_millis(100));
            continue;
        };
        buffer.set_payload(BufferPayload {
            filled_len: size.min(buffer.capacity()),
            offset: 0,
            timestamp: sent as i64 * 33_333,
            flags: 0,
        })?;
        tunnel::forward_buffer(output, &buffer, input)?;
        sent += 1;
    }
    Ok(sent)
}

fn consume(input: &Port, output: &Port, frames: usize) -> Result<usize> {
    let mut received = 0;
    let mut last_timestamp = -1;
    while received < frames {
        if input.wait_for_buffer(Duration::from_millis(100)).is_none() {
            continue;
        }
        let Some(buffer) = input.pop_buffer() else {
            continue;
        };
        let payload = buffer.payload();
        if payload.timestamp <= last_timestamp {
            return Err(PortError::state(format!(
                "frame {} arrived out of order",
                payload.timestamp
            )));
        }
        last_timestamp = payload.timestamp;
        tunnel::forward_buffer(input, &buffer, output)?;
        received += 1;
    }
    Ok(received)
}

fn join(handle: thread::JoinHandle<Result<usize>>) -> Result<usize> {
    handle
        .join()
        .map_err(|_| PortError::state("worker thread panicked"))?
}

fn run_queue(matches: &ArgMatches) -> Result<()> {
    let buffers = parse_arg(matches, "buffers")?;
    let iterations = parse_arg(matches, "iterations")?;

    let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
    let port = Port::with_name(
        "filter.in",
        PortDefinition::new(Direction::Input, 1, buffers, 1024),
    )?;
    for _ in 0..buffers {
        port.allocate_buffer(&allocator, 1024)?;
    }
    port.enable();

    let start = Instant::now();
    for _ in 0..iterations {
        let Some(buffer) = port.allocate_next_buffer() else {
            let mut queue = port.lock_buffers();
            for pending in queue.drain() {
                queue.release(&pending)?;
            }
            continue;
        };
        port.push_buffer(&buffer)?;
    }
    let elapsed = start.elapsed();

    println!(
        "{} rounds in {:?} ({:.0} ns/round)",
        iterations,
        elapsed,
        elapsed.as_nanos() as f64 / iterations.max(1) as f64
    );
    println!("{}: {}", port.name(), port.stats().summary());

    let freed = port.teardown()?;
    debug!("freed {} buffers, {} blocks outstanding", freed, allocator.outstanding());
    Ok(())
}
