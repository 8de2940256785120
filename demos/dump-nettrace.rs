use std::fs::File;

use nettrace::{PayloadValue, TraceDecoder};

// https://github.com/microsoft/perfview/blob/main/src/TraceEvent/EventPipe/EventPipeFormat.md

fn main() {
    env_logger::init();

    let path = std::env::args().nth(1).expect("usage: dump-nettrace <file>");
    let file = File::open(&path).expect("Failed to open trace file");

    let mut decoder = TraceDecoder::new();
    decoder.set_progress_sink(|bytes, events| {
        log::debug!("{bytes} bytes read, {events} events");
    });

    let trace = match decoder.read_stream(file) {
        Ok(trace) => trace,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let meta = &trace.metadata;
    println!(
        "trace from pid {} on {} cpus, pointer size {}, qpc {} Hz",
        meta.process_id, meta.number_of_processors, meta.pointer_size, meta.qpc_frequency
    );
    println!(
        "{} events, {} schemas, {} distinct stacks",
        trace.events.len(),
        trace.event_metadata.len(),
        trace.stacks.len()
    );

    for event in &trace.events {
        let md = &event.metadata;
        print!(
            "{:10} {}/{} ({})",
            event.timestamp, md.provider_name, md.event_name, md.event_id
        );
        for (name, value) in event.payload.iter() {
            match value {
                PayloadValue::String(s) => print!(" {name}={s:?}"),
                other => print!(" {name}={other:?}"),
            }
        }
        println!();
        for frame in &event.stack.frames {
            println!("    {}", frame.display_name());
        }
    }
}
