// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn timestamp_arg(help: &'static str) -> Arg {
    Arg::new("timestamp")
        .short('t')
        .long("timestamp")
        .value_name("YYYYMMDDHHMMSS")
        .help(help)
}

fn build_cli() -> Command {
    Command::new("binrep")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Binrep Contributors")
        .about("Static binary repository manager")
        .subcommand_required(true)
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .env("BINREP_BACKEND_ENDPOINT")
                .global(true)
                .help("Repository endpoint: a directory or file:///path"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .global(true)
                .help("Abort the operation after this many seconds"),
        )
        .subcommand(
            Command::new("list")
                .about("List projects and their latest release")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of text"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show the binaries of a release")
                .arg(Arg::new("project").required(true).help("Project path"))
                .arg(timestamp_arg("Release timestamp (default: latest)"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print JSON instead of text"),
                ),
        )
        .subcommand(
            Command::new("push")
                .about("Publish binaries as a new release")
                .arg(Arg::new("project").required(true).help("Project path"))
                .arg(
                    Arg::new("binaries")
                        .required(true)
                        .num_args(1..)
                        .help("Binaries to publish"),
                )
                .arg(timestamp_arg("Release timestamp (default: now)"))
                .arg(
                    Arg::new("keep_releases")
                        .short('k')
                        .long("keep-releases")
                        .default_value("5")
                        .help("Number of releases to keep, 0 keeps everything"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Upload binaries even when an identical one was already pushed"),
                )
                .arg(
                    Arg::new("binary_version")
                        .long("binary-version")
                        .help("Version recorded for every pushed binary"),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .default_value("1")
                        .help("Concurrent uploads"),
                ),
        )
        .subcommand(
            Command::new("pull")
                .about("Install the binaries of a release")
                .arg(Arg::new("project").required(true).help("Project path"))
                .arg(
                    Arg::new("install_dir")
                        .required(true)
                        .help("Directory the binaries are installed into"),
                )
                .arg(timestamp_arg("Release timestamp (default: latest)"))
                .arg(
                    Arg::new("max_bandwidth")
                        .long("max-bandwidth")
                        .help("Bandwidth limit, e.g. 10MB or 512KiB (per second)"),
                )
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .default_value("1")
                        .help("Concurrent downloads"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("binrep.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
