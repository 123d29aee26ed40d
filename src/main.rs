use clap::{Arg, ArgAction, Command};
use log::{error, info};

use bcf2hdf5::BcfConverter;

fn main() {
    let matches = Command::new("bcf2hdf5")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Convert a Bruker Nano .bcf file into a DREAM.3D compatible HDF5 file.")
        .arg(
            Arg::new("bcf")
                .short('b')
                .long("bcf")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the input .bcf file."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path of the HDF5 file to write."),
        )
        .arg(
            Arg::new("reorder")
                .short('r')
                .long("reorder")
                .value_parser(["true", "false"])
                .default_value("false")
                .help(
                    "Reorder the per-point data into grid order inside the HDF5 file. \
                     This can increase the final file size significantly.",
                ),
        )
        .arg(
            Arg::new("flip")
                .short('f')
                .long("flip")
                .value_parser(["true", "false"])
                .default_value("false")
                .help("Flip the patterns across the X axis (vertical flip)."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable per-row progress output."),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "info" }),
    )
    .init();

    let input = matches.get_one::<String>("bcf").unwrap();
    let output = matches.get_one::<String>("output").unwrap();
    let reorder = matches.get_one::<String>("reorder").unwrap() == "true";
    let flip = matches.get_one::<String>("flip").unwrap() == "true";

    let mut converter = BcfConverter::new(input.as_str(), output.as_str());
    converter.set_reorder(reorder);
    converter.set_flip_patterns(flip);

    if let Err(err) = converter.execute() {
        error!("Error: {}", err);
        std::process::exit(1);
    }
    info!("Complete");
}
