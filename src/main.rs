use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use line_ext_sort::{ExternalSorter, ExternalSorterBuilder, IntKey, KeyExtractor, SortError, TsvKey};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let key: Key = arg_parser.value_of_t_or_exit("key");
    let field: usize = arg_parser.value_of_t_or_exit("field");
    let batch_size: usize = arg_parser.value_of_t_or_exit("batch_size");
    let window_size: usize = arg_parser.value_of_t_or_exit("window_size");
    let workers: Option<usize> = arg_parser
        .is_present("workers")
        .then(|| arg_parser.value_of_t_or_exit("workers"));
    let rw_buf_size: Option<usize> = arg_parser.value_of("rw_buf_size").map(|size| {
        size.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize
    });
    let chunk_dir = arg_parser.value_of("chunk_dir").expect("value is required");

    let input = arg_parser.value_of("input").expect("value is required");
    let input_stream = match fs::File::open(input) {
        Ok(file) => io::BufReader::new(file),
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");
    let mut output_stream = match fs::File::create(output) {
        Ok(file) => file,
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let options = Options {
        chunk_dir: path::Path::new(chunk_dir),
        batch_size,
        window_size,
        workers,
        rw_buf_size,
    };

    let started = Instant::now();
    let result = match key {
        Key::Int => run(IntKey, &options, input_stream, &mut output_stream),
        Key::Tsv => run(TsvKey::new(field), &options, input_stream, &mut output_stream),
    };

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }

    if let Err(err) = output_stream.sync_all() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }

    log::info!("sorted in {:.3?}", started.elapsed());
}

struct Options<'a> {
    chunk_dir: &'a path::Path,
    batch_size: usize,
    window_size: usize,
    workers: Option<usize>,
    rw_buf_size: Option<usize>,
}

fn run<X, R, W>(key_extractor: X, options: &Options, input: R, output: W) -> Result<(), SortError>
where
    X: KeyExtractor,
    R: BufRead,
    W: Write,
{
    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_key_extractor(key_extractor)
        .with_chunk_dir(options.chunk_dir)
        .with_batch_size(options.batch_size)
        .with_window_size(options.window_size);

    if let Some(workers) = options.workers {
        sorter_builder = sorter_builder.with_workers(workers);
    }

    if let Some(rw_buf_size) = options.rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
    }

    let sorter: ExternalSorter<X> = sorter_builder.build()?;

    sorter.sort(input.lines(), output)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Key {
    Int,
    Tsv,
}

impl Key {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Key::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Key as clap::ArgEnum>::from_str(s, false)
    }
}

fn positive_number(value: &str) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(0) => Err("value must be greater than 0".to_owned()),
        Ok(_) => Ok(()),
        Err(err) => Err(format!("number format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("line-ext-sort")
        .about("external sorter for line-oriented files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_dir")
                .short('c')
                .long("chunk-dir")
                .help("directory to be used to store chunk files")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("batch_size")
                .short('s')
                .long("batch-size")
                .help("maximum number of lines in a chunk")
                .takes_value(true)
                .default_value("100000")
                .validator(positive_number),
        )
        .arg(
            clap::Arg::new("workers")
                .short('w')
                .long("workers")
                .help("number of chunks sorted in parallel")
                .takes_value(true)
                .validator(positive_number),
        )
        .arg(
            clap::Arg::new("window_size")
                .short('b')
                .long("window-size")
                .help("number of lines per chunk kept in memory while merging")
                .takes_value(true)
                .default_value("1000")
                .validator(positive_number),
        )
        .arg(
            clap::Arg::new("key")
                .short('k')
                .long("key")
                .help("sort key")
                .takes_value(true)
                .default_value("tsv")
                .possible_values(Key::possible_values()),
        )
        .arg(
            clap::Arg::new("field")
                .short('f')
                .long("field")
                .help("zero based tab-separated field used by the tsv key")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .help("chunk and output file read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() > 0 => Ok(()),
                    Ok(_) => Err("buffer size must be greater than 0".to_owned()),
                    Err(err) => Err(format!("buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
