use assert_cmd::Command;
use predicates::prelude::*;

fn bktec() -> Command {
    let mut cmd = Command::cargo_bin("bktec").unwrap();
    cmd.env_clear();
    cmd
}

#[test]
fn test_version() {
    bktec()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_rejects_invalid_config() {
    bktec()
        .arg("run")
        .env("BUILDKITE_PARALLEL_JOB_COUNT", "2")
        .env("BUILDKITE_PARALLEL_JOB", "5")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid config"))
        .stderr(predicate::str::contains(
            "BUILDKITE_TEST_ENGINE_SUITE_SLUG must not be blank",
        ))
        .stderr(predicate::str::contains(
            "BUILDKITE_PARALLEL_JOB must be less than 2",
        ));
}

#[test]
fn test_plan_does_not_need_parallelism() {
    bktec()
        .arg("plan")
        .env("BUILDKITE_TEST_ENGINE_MAX_PARALLELISM", "10")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("BUILDKITE_PARALLEL_JOB_COUNT").not());
}

#[test]
fn test_plan_output_flags_conflict() {
    bktec()
        .args(["plan", "--json", "--pipeline-upload", "pipeline.yml"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_flag() {
    bktec().args(["run", "--no-such-flag"]).assert().code(2);
}

#[test]
fn test_invalid_boolean_env() {
    bktec()
        .arg("run")
        .env("BUILDKITE_TEST_ENGINE_SPLIT_BY_EXAMPLE", "maybe")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not a valid boolean"));
}
