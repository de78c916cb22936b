use crate::command_table::ArgValue;
use crate::error::PipelineError;
use crate::options::ExecOptions;
use crate::pipeline::{Pipeline, PipelineOutput};
use crate::tests::prelude::*;
use std::ffi::OsStr;
use std::os::fd::AsRawFd;

fn records_of(pipeline: &Pipeline, input: &str, delimiter: u8) -> Vec<String> {
    pipeline
        .records(input, delimiter)
        .unwrap()
        .map(|r| String::from_utf8(r.unwrap()).unwrap())
        .collect()
}

#[test]
#[serial]
fn test_cat_roundtrip() {
    test_init();
    let cat = Pipeline::new([["cat"]]).unwrap();
    assert_eq!(cat.capture("hello").unwrap(), b"hello");
    assert_eq!(cat.capture(&b"bytes\0too"[..]).unwrap(), b"bytes\0too");
    assert!(no_children_left());
}

#[test]
#[serial]
fn test_two_stages() {
    test_init();
    let upper = Pipeline::new([vec!["cat"], vec!["tr", "a-z", "A-Z"]]).unwrap();
    assert_eq!(upper.capture("abc").unwrap(), b"ABC");
    // Runs are independent of each other.
    assert_eq!(upper.capture("xyz").unwrap(), b"XYZ");
}

#[test]
#[serial]
fn test_no_input_means_eof() {
    test_init();
    let wc = Pipeline::new([["wc", "-c"]]).unwrap();
    for input in [None, Some("")] {
        let out = wc.capture(input).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "0");
    }
}

#[test]
#[serial]
fn test_large_payload_is_written_in_full() {
    test_init();
    let payload = "0123456789abcdef".repeat(8 * 1024);
    let wc = Pipeline::new([["wc", "-c"]]).unwrap();
    let out = wc.capture(&payload).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap().trim(),
        payload.len().to_string()
    );
}

#[test]
#[serial]
fn test_output_larger_than_initial_capacity() {
    test_init();
    let seq = Pipeline::new([["seq", "1", "20000"]]).unwrap();
    let opts = ExecOptions::new().capacity(1).unwrap();
    let out = seq.output(None::<&str>, &opts).unwrap();
    assert!(out.success());
    let text = String::from_utf8(out.stdout).unwrap();
    assert_eq!(text.lines().count(), 20000);
    assert_eq!(text.lines().last(), Some("20000"));
}

#[test]
#[serial]
fn test_streaming_records() {
    test_init();
    let printf = |fmt: &str| Pipeline::new([["printf", fmt]]).unwrap();
    assert_eq!(records_of(&printf("a\\nb\\nc"), "", b'\n'), ["a", "b", "c"]);
    assert_eq!(records_of(&printf("a\\nb\\n"), "", b'\n'), ["a", "b"]);
    assert!(records_of(&printf(""), "", b'\n').is_empty());

    let cat = Pipeline::new([["cat"]]).unwrap();
    assert_eq!(records_of(&cat, "x,,y", b','), ["x", "", "y"]);
}

#[test]
#[serial]
fn test_streaming_many_records_small_buffer() {
    test_init();
    let seq = Pipeline::new([["seq", "1", "5000"]]).unwrap();
    let opts = ExecOptions::new().delimiter(b'\n').capacity(3).unwrap();
    let PipelineOutput::Records(reader) = seq.run(None::<&str>, &opts).unwrap() else {
        panic!("a delimiter should select streaming");
    };
    let mut expected = 1;
    for record in reader {
        assert_eq!(record.unwrap(), expected.to_string().into_bytes());
        expected += 1;
    }
    assert_eq!(expected, 5001);
    assert!(no_children_left());
}

#[test]
#[serial]
fn test_run_without_delimiter_captures() {
    test_init();
    let cat = Pipeline::new([["cat"]]).unwrap();
    match cat.run("all at once", &ExecOptions::default()).unwrap() {
        PipelineOutput::Captured(out) => assert_eq!(out, b"all at once"),
        PipelineOutput::Records(_) => panic!("no delimiter should capture"),
    }
}

#[test]
#[serial]
fn test_exhausted_reader_stays_exhausted() {
    test_init();
    let cat = Pipeline::new([["cat"]]).unwrap();
    let mut reader = cat.records("one\ntwo", b'\n').unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap(), b"one");
    assert_eq!(reader.next_record().unwrap().unwrap(), b"two");
    for _ in 0..3 {
        assert!(reader.next_record().is_none());
    }
    // Exhaustion already reaped the stage.
    assert!(no_children_left());
    assert!(reader.statuses()[0].is_success());
}

#[test]
#[serial]
fn test_abandoned_reader_does_not_hang() {
    test_init();
    let before = open_fd_count();
    // `yes` never stops on its own; closing the read end must terminate it.
    let yes = Pipeline::new([vec!["yes"], vec!["cat"]]).unwrap();
    let mut reader = yes.records(None::<&str>, b'\n').unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap(), b"y");
    assert_eq!(reader.next_record().unwrap().unwrap(), b"y");
    let statuses = reader.close();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| !s.is_empty()));
    assert!(statuses[0].signal_exited());
    assert_eq!(statuses[0].signal_code(), Some(libc::SIGPIPE));
    assert_eq!(open_fd_count(), before);
    assert!(no_children_left());

    let reader = yes.records(None::<&str>, b'\n').unwrap();
    drop(reader);
    assert_eq!(open_fd_count(), before);
    assert!(no_children_left());
}

#[test]
#[serial]
fn test_exec_failure_is_not_an_error() {
    test_init();
    let broken = Pipeline::new([vec!["cat"], vec!["pipelay-test-no-such-command"]]).unwrap();
    let out = broken.output(None::<&str>, &ExecOptions::default()).unwrap();
    assert!(out.stdout.is_empty());
    assert!(out.statuses[0].is_success());
    assert_eq!(out.statuses[1].exit_code(), Some(127));
    assert!(!out.success());
    assert!(broken.capture(None::<&str>).unwrap().is_empty());
}

#[test]
#[serial]
fn test_statuses_are_reported() {
    test_init();
    let shell = Pipeline::new([vec!["sh", "-c", "exit 3"], vec!["cat"]]).unwrap();
    let out = shell.output(None::<&str>, &ExecOptions::default()).unwrap();
    assert_eq!(out.statuses[0].exit_code(), Some(3));
    assert_eq!(out.statuses[0].status_value(), Some(3));
    assert!(out.statuses[1].is_success());
}

#[test]
fn test_construction_errors() {
    let empty: Vec<Vec<&str>> = vec![];
    assert!(matches!(
        Pipeline::new(empty),
        Err(PipelineError::InvalidPipeline(_))
    ));

    let err = Pipeline::new([vec!["cat"], vec![]]).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidPipeline(_)));
    assert!(err.to_string().contains("stage 1"), "{err}");

    let err = Pipeline::new([vec!["echo", "a\0b"]]).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));

    let err = Pipeline::new([vec![
        ArgValue::Text("echo".into()),
        ArgValue::Other("int".into()),
    ]])
    .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
}

#[test]
#[serial]
fn test_mixed_argument_kinds() {
    test_init();
    let pipeline = Pipeline::new([vec![
        ArgValue::Text("printf".into()),
        ArgValue::Bytes(b"%s-%s".to_vec()),
        ArgValue::Text("x".into()),
        ArgValue::Bytes(b"y".to_vec()),
    ]])
    .unwrap();
    assert_eq!(pipeline.capture(None::<&str>).unwrap(), b"x-y");

    let echo = Pipeline::new([[OsStr::new("echo"), OsStr::new("os")]]).unwrap();
    assert_eq!(echo.capture(None::<&str>).unwrap(), b"os\n");
}

#[test]
fn test_display() {
    let pipeline = Pipeline::new([
        vec!["grep", "-v", ""],
        vec!["sed", "s/a b/c/"],
        vec!["sort"],
    ])
    .unwrap();
    assert_eq!(pipeline.to_string(), "grep -v '' | sed 's/a b/c/' | sort");
    assert_eq!(Pipeline::new([["true"]]).unwrap().to_string(), "true");
}

#[test]
#[serial]
fn test_open_exposes_launch_state() {
    test_init();
    let before = open_fd_count();
    let cat = Pipeline::new([vec!["cat"], vec!["cat"]]).unwrap();
    let open = cat.open().unwrap();
    assert_eq!(open.pids().len(), 2);
    let input = open.input_fd().unwrap().as_raw_fd();
    assert_ne!(input, open.output_fd().as_raw_fd());
    assert_eq!(open_fd_count(), before + 2);
    drop(open);
    assert_eq!(open_fd_count(), before);
    assert!(no_children_left());

    let state = cat.open().unwrap().into_launch_state();
    assert_eq!(state.children().len(), 2);
    drop(state);
    assert!(no_children_left());
}

#[test]
#[serial]
fn test_successful_run_logs_nothing_by_default() {
    use crate::flog::{
        activate_flog_categories_by_pattern, categories, get_flog_file_fd, set_flog_file_fd,
        DEBUG_ENV_VAR,
    };
    use crate::fds::make_autoclose_pipes;
    use std::fs::File;
    use std::io::Read;
    use std::sync::atomic::Ordering;

    test_init();
    if std::env::var_os(DEBUG_ENV_VAR).is_none() {
        assert!(!categories::exec_job.enabled.load(Ordering::Relaxed));
    }
    let pipes = make_autoclose_pipes().unwrap();
    let saved = get_flog_file_fd();
    set_flog_file_fd(pipes.write.as_raw_fd());

    let cat = Pipeline::new([["cat"]]).unwrap();
    activate_flog_categories_by_pattern("-exec-job");
    assert_eq!(cat.capture("quiet").unwrap(), b"quiet");
    activate_flog_categories_by_pattern("exec-job");
    assert_eq!(cat.capture("loud").unwrap(), b"loud");
    activate_flog_categories_by_pattern("-exec-job");

    set_flog_file_fd(saved);
    drop(pipes.write);
    let mut logged = String::new();
    File::from(pipes.read).read_to_string(&mut logged).unwrap();
    assert_eq!(logged, "exec-job: Running pipeline: cat\n");
}

#[test]
#[serial]
fn test_write_failure_unwinds() {
    test_init();
    let before = open_fd_count();
    // `true` never reads, so once it exits the rest of the payload hits a closed pipe.
    let payload = vec![b'x'; 8 * 1024 * 1024];
    let sink = Pipeline::new([["true"]]).unwrap();
    let err = sink.capture(&payload).unwrap_err();
    assert!(matches!(err, PipelineError::IoError(_)), "{err}");
    assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
    assert_eq!(open_fd_count(), before);
    assert!(no_children_left());

    let err = sink.records(&payload, b'\n').unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
    assert_eq!(open_fd_count(), before);
    assert!(no_children_left());
}
