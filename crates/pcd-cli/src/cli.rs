use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

pub(crate) fn command() -> Command {
    Command::new("pcdeploy")
        .version(pcd_core::VERSION)
        .about("Provision, build and load test data into PhenomeCentral deployments")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file with [cloud], [builder] and [loader] sections"),
        )
        .subcommand(
            Command::new("vm")
                .about("Manage build VMs")
                .subcommand_required(true)
                .subcommand(
                    Command::new("deploy")
                        .about("Start a VM that builds the given instructions")
                        .arg(build_name_arg().required(true))
                        .arg(instructions_arg().required(true))
                        .arg(
                            Arg::new("log-folder")
                                .long("log-folder")
                                .value_parser(value_parser!(PathBuf))
                                .help("Folder receiving latest_deploy_v2.log (default: current directory)"),
                        ),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete the VM of a build")
                        .arg(build_name_arg().required(true)),
                )
                .subcommand(Command::new("list").about("Write running build VMs and usage to the server list file")),
        )
        .subcommand(
            Command::new("build")
                .about("Build, deploy and start from build instructions")
                .arg(instructions_arg())
                .arg(build_name_arg())
                .args(directory_args())
                .arg(
                    Arg::new("no-clean")
                        .long("no-clean")
                        .action(ArgAction::SetTrue)
                        .help("Keep existing checkouts"),
                )
                .arg(
                    Arg::new("no-run")
                        .long("no-run")
                        .action(ArgAction::SetTrue)
                        .help("Skip the run phase"),
                )
                .arg(
                    Arg::new("metadata-url")
                        .long("metadata-url")
                        .help("VM metadata service URL"),
                ),
        )
        .subcommand(
            Command::new("pc-build")
                .about("Build and deploy PhenomeCentral from chosen branches")
                .arg(branch_arg("pn", "patient-network"))
                .arg(branch_arg("rm", "remote-matching"))
                .arg(branch_arg("pc", "phenomecentral.org"))
                .arg(build_name_arg())
                .args(directory_args())
                .arg(
                    Arg::new("start")
                        .long("start")
                        .action(ArgAction::SetTrue)
                        .help("Start the instance after deploying"),
                ),
        )
        .subcommand(
            Command::new("data")
                .about("Manage test datasets")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("Write available datasets to the datasets list file"))
                .subcommand(
                    Command::new("upload")
                        .about("Upload a dataset to a running instance")
                        .arg(
                            Arg::new("ip")
                                .long("ip")
                                .required(true)
                                .help("Instance address, HOST[:PORT] (port defaults to 8080)"),
                        )
                        .arg(
                            Arg::new("dataset-name")
                                .long("dataset-name")
                                .required(true)
                                .help("Dataset folder name"),
                        )
                        .arg(
                            Arg::new("use-https")
                                .long("use-https")
                                .action(ArgAction::SetTrue)
                                .help("Use HTTPS instead of HTTP"),
                        ),
                ),
        )
}

fn build_name_arg() -> Arg {
    Arg::new("build-name")
        .long("build-name")
        .help("Build name; also names the VM and the deploy sub-directory")
}

fn instructions_arg() -> Arg {
    Arg::new("build-instructions-file")
        .long("build-instructions-file")
        .value_parser(value_parser!(PathBuf))
        .help("JSON file with build, deploy and run instructions")
}

fn directory_args() -> [Arg; 2] {
    [
        Arg::new("git-dir")
            .long("git-dir")
            .value_parser(value_parser!(PathBuf))
            .help("Checkout directory"),
        Arg::new("deployment-dir")
            .long("deployment-dir")
            .value_parser(value_parser!(PathBuf))
            .help("Deploy root"),
    ]
}

fn branch_arg(id: &'static str, repository: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(format!("Branch of {repository}"))
}
