use std::fs::File;
use std::io::{prelude::*, stdin, BufReader};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use extgaz::document::whitespace_tokens;
use extgaz::{Annotation, ExtendedGazetteer, ExtendedGazetteerOptions, Gazetteer, GazetteerConfig};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ArgColor {
    Never,
    Always,
    Auto,
}

#[derive(Parser, Debug)]
#[clap(name = "gazfind", about = "A program to find gazetteer entries in files.")]
struct Args {
    /// A .def or .defyaml file listing the gazetteer lists.
    #[clap(short, long)]
    config: PathBuf,

    /// Matches entries regardless of case.
    #[clap(short = 'i', long)]
    case_insensitive: bool,

    /// Locale used for case folding.
    #[clap(long, default_value = "en")]
    locale: String,

    /// Separator between an entry and its features in list files.
    #[clap(long, default_value = "\t")]
    separator: String,

    /// Reports every match instead of only the longest one from each start.
    #[clap(short, long)]
    all_matches: bool,

    /// Allows matches to start inside a word.
    #[clap(long)]
    no_word_start: bool,

    /// Allows matches to end inside a word.
    #[clap(long)]
    no_word_end: bool,

    /// Splits lines into whitespace-separated tokens and matches token sequences.
    #[clap(short, long)]
    tokens: bool,

    /// Prints the match annotations of each line as JSON.
    #[clap(long)]
    json: bool,

    /// Suppresses printing filenames.
    #[clap(short = 'H', long)]
    no_filename: bool,

    /// Prints line numbers.
    #[clap(short = 'n', long)]
    line_number: bool,

    /// Highlights the matching texts.
    #[clap(long, value_enum, default_value = "never")]
    color: ArgColor,

    /// File paths.
    #[clap(name = "FILE")]
    files: Vec<PathBuf>,
}

struct Finder {
    ext: ExtendedGazetteer,
    tokens: bool,
    json: bool,
    color: ArgColor,
}

impl Finder {
    fn annotate(&self, line: &str) -> extgaz::errors::Result<Vec<Annotation>> {
        if self.tokens {
            self.ext.execute(&whitespace_tokens(line))
        } else {
            self.ext.annotate_text(line)
        }
    }

    /// Finds entries in the given line and prints it to `stream`.
    /// When no entry is found, this function does not print any string.
    fn find_and_output(
        &self,
        line: &str,
        filename: Option<&str>,
        line_no: Option<usize>,
        stream: &mut StandardStream,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let anns = self.annotate(line)?;
        if anns.is_empty() {
            return Ok(());
        }
        if let Some(filename) = filename {
            write!(stream, "{}:", filename)?;
        }
        if let Some(line_no) = line_no {
            write!(stream, "{}:", line_no)?;
        }
        if self.json {
            writeln!(stream, "{}", serde_json::to_string(&anns)?)?;
            return Ok(());
        }
        match self.color {
            ArgColor::Never => writeln!(stream, "{}", line)?,
            ArgColor::Always | ArgColor::Auto => {
                let mut color_counts = vec![0isize; line.len() + 1];
                for ann in &anns {
                    color_counts[ann.start] += 1;
                    color_counts[ann.end] -= 1;
                }
                let mut depth = 0;
                let mut prev_pos = 0;
                for (pos, c) in color_counts.into_iter().enumerate() {
                    let new_depth = depth + c;
                    if depth == 0 && new_depth != 0 {
                        stream.reset()?;
                        write!(stream, "{}", &line[prev_pos..pos])?;
                        prev_pos = pos;
                    } else if depth != 0 && new_depth == 0 {
                        stream.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
                        write!(stream, "{}", &line[prev_pos..pos])?;
                        prev_pos = pos;
                    }
                    depth = new_depth;
                }
                stream.reset()?;
                writeln!(stream, "{}", &line[prev_pos..])?;
            }
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = GazetteerConfig::new(&args.config)
        .case_sensitive(!args.case_insensitive)
        .locale(args.locale.as_str())
        .separator(args.separator.as_str());
    let gazetteer = Gazetteer::open(&config)?;
    let options = ExtendedGazetteerOptions::new()
        .longest_match_only(!args.all_matches)
        .word_start_only(!args.no_word_start)
        .word_end_only(!args.no_word_end);
    let finder = Finder {
        ext: ExtendedGazetteer::new(gazetteer, options)?,
        tokens: args.tokens,
        json: args.json,
        color: args.color,
    };

    // Initialize the stream of termcolor.
    let mut stdout = match args.color {
        ArgColor::Never => StandardStream::stdout(ColorChoice::Never),
        ArgColor::Always => StandardStream::stdout(ColorChoice::Always),
        ArgColor::Auto => StandardStream::stdout(ColorChoice::Auto),
    };

    // For the standard input.
    if args.files.is_empty() {
        for (i, line) in stdin().lock().lines().enumerate() {
            let line_number = if args.line_number { Some(i + 1) } else { None };
            finder.find_and_output(&line?, None, line_number, &mut stdout)?;
        }
    }

    // For the given files.
    for filename in &args.files {
        match File::open(filename) {
            Ok(file) => {
                let buf = BufReader::new(file);
                let filename = filename.to_str().and_then(|filename| {
                    if args.no_filename {
                        None
                    } else {
                        Some(filename)
                    }
                });
                for (i, line) in buf.lines().enumerate() {
                    let line_number = if args.line_number { Some(i + 1) } else { None };
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            if let Some(filename) = filename {
                                eprintln!("{}: {:?}", filename, err);
                            } else {
                                eprintln!("{:?}", err);
                            }
                            break;
                        }
                    };
                    finder.find_and_output(&line, filename, line_number, &mut stdout)?;
                }
            }
            Err(err) => {
                if let Some(filename) = filename.to_str() {
                    eprintln!("{}: {:?}", filename, err);
                } else {
                    eprintln!("{:?}", err);
                }
            }
        }
    }

    Ok(())
}
