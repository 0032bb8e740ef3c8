use clap::{value_parser, Arg, Command, ValueHint};
use dia_cli::input::Input;
use dia_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(
            env_logger::Env::default().filter_or("DIA_LOG", "error,dia_core=info,dia_cli=info"),
        )
        .init();

    let matches = Command::new("dia")
        .version(clap::crate_version!())
        .about("Chromatogram extraction, scoring and FDR control for DIA proteomics")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("scans")
                .long("scans")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to MS2 scans (JSON). Overrides the file listed in the configuration \
                     file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("library")
                .long("library")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the spectral library (JSON). Overrides the file listed in the \
                     configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where results will be written. Overrides the directory specified \
                     in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of extraction worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("gpu")
                .long("gpu")
                .action(clap::ArgAction::SetTrue)
                .help(
                    "Extract with the batched accelerator backend when one is available \
                     (see DIA_DEVICE)",
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let input = Input::from_arguments(matches)?;
    let parameters = input.build()?;
    Runner::new(parameters).run()?;

    Ok(())
}
