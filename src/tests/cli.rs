use crate::cli::Cli;
use clap::Parser;
use std::path::PathBuf;

#[test]
fn test_cli_parsing_defaults() {
    let cli = Cli::try_parse_from(["steadybit-debug"]).unwrap();
    assert_eq!(cli.config, PathBuf::from("steadybit-debug.yml"));
    assert!(cli.output_path.is_none());
    assert!(!cli.no_cleanup);
    assert!(!cli.export_database);
    assert!(!cli.verbose);
}

#[test]
fn test_cli_parsing_output_and_cleanup() {
    let cli = Cli::try_parse_from(["steadybit-debug", "-o", "/tmp/out", "--no-cleanup"]).unwrap();
    assert_eq!(cli.output_path, Some(PathBuf::from("/tmp/out")));
    assert!(cli.no_cleanup);
}

#[test]
fn test_cli_parsing_workload_names() {
    let args = [
        "steadybit-debug",
        "--platform-deployment",
        "platform",
        "--platform-namespace",
        "sb",
        "--agent-daemon-set",
        "agent",
        "--outpost-stateful-set",
        "outpost",
        "--outpost-namespace",
        "outposts",
    ];
    let cli = Cli::try_parse_from(args).unwrap();
    assert_eq!(cli.platform_deployment, Some("platform".to_string()));
    assert_eq!(cli.platform_namespace, Some("sb".to_string()));
    assert_eq!(cli.agent_daemon_set, Some("agent".to_string()));
    assert_eq!(cli.outpost_stateful_set, Some("outpost".to_string()));
    assert_eq!(cli.outpost_namespace, Some("outposts".to_string()));
}

#[test]
fn test_cli_parsing_certificates() {
    let args = [
        "steadybit-debug",
        "--cert-chain-file",
        "chain.pem",
        "--cert-key-file",
        "key.pem",
    ];
    let cli = Cli::try_parse_from(args).unwrap();
    assert_eq!(cli.cert_chain_file, Some(PathBuf::from("chain.pem")));
    assert_eq!(cli.cert_key_file, Some(PathBuf::from("key.pem")));
}

#[test]
fn test_cli_parsing_cluster_access() {
    let args = [
        "steadybit-debug",
        "--kube-config",
        "/home/me/.kube/other",
        "--context",
        "staging",
        "--kubectl",
        "/usr/local/bin/kubectl",
        "--tunnel-timeout",
        "5",
        "-v",
    ];
    let cli = Cli::try_parse_from(args).unwrap();
    assert_eq!(cli.kube_config, Some(PathBuf::from("/home/me/.kube/other")));
    assert_eq!(cli.context, Some("staging".to_string()));
    assert_eq!(cli.kubectl, Some("/usr/local/bin/kubectl".to_string()));
    assert_eq!(cli.tunnel_timeout, Some(5));
    assert!(cli.verbose);
}

#[test]
fn test_cli_rejects_unknown_flag() {
    assert!(Cli::try_parse_from(["steadybit-debug", "--no-such-flag"]).is_err());
}
