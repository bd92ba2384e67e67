use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use line_ext_sort::{ExternalSorter, ExternalSorterBuilder, KeyError};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input = vec![
        "3\tD\tequipment",
        "7\tG\tinflation",
        "1\tN\tguidance",
        "2\tT\tlibrary",
        "9\tI\tchild",
        "6\tH\tdelivery",
    ];

    // orders rows by the length of the third field, then by the first one
    let by_word_length = |line: &str| -> Result<(usize, String), KeyError> {
        let mut fields = line.split('\t');
        let id = fields.next().unwrap_or_default().to_owned();
        match fields.nth(1) {
            Some(word) => Ok((word.len(), id)),
            None => Err(KeyError::Custom(format!("line {:?} has no word", line))),
        }
    };

    let sorter: ExternalSorter<_> = ExternalSorterBuilder::new()
        .with_key_extractor(by_word_length)
        .with_chunk_dir(path::Path::new("./chunks"))
        .with_batch_size(2)
        .with_window_size(1)
        .with_workers(2)
        .build()
        .unwrap();

    let stdout = io::stdout();
    let mut output = stdout.lock();
    sorter
        .sort(input.into_iter().map(|line| Ok(line.to_owned())), &mut output)
        .unwrap();
    output.flush().unwrap();
}
