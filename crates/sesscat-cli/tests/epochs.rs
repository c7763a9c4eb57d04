use assert_cmd::cargo::cargo_bin_cmd;
use std::error::Error;
use std::fs;

#[test]
fn normalize_epochs_rewrites_legacy_file_in_canonical_form() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("encoder.csv");
    fs::write(
        &path,
        "time,duration,label\n5.0000004,1.0,Type 2\n1.25,0.75,Type 1\n",
    )?;

    let mut cmd = cargo_bin_cmd!("sesscat");
    cmd.args(["normalize-epochs", "--input", path.to_str().unwrap()]);
    let output = cmd.assert().success().get_output().stdout.clone();
    assert!(String::from_utf8(output)?.contains("2 epoch(s)"));

    let contents = fs::read_to_string(&path)?;
    assert_eq!(
        contents,
        "Start (s),End (s),Type\n1.25,2.0,Type 1\n5.0,6.0,Type 2\n"
    );
    Ok(())
}

#[test]
fn normalize_epochs_is_idempotent() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("encoder.csv");
    fs::write(&path, "Start (s),End (s),Type\n1.0,2.0,Type 1\n")?;

    let first = {
        let mut cmd = cargo_bin_cmd!("sesscat");
        cmd.args(["normalize-epochs", "--input", path.to_str().unwrap()]);
        cmd.assert().success();
        fs::read_to_string(&path)?
    };
    let mut cmd = cargo_bin_cmd!("sesscat");
    cmd.args(["normalize-epochs", "--input", path.to_str().unwrap()]);
    cmd.assert().success();
    assert_eq!(fs::read_to_string(&path)?, first);
    Ok(())
}

#[test]
fn timeline_merges_annotations_and_encoder_streams() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let data = dir.path().join("s1");
    fs::create_dir_all(&data)?;
    fs::write(
        data.join("annotations.csv"),
        "Start (s),End (s),Type,Label\n4.0,5.0,Swallow,strong\n0.5,3.0,Bite,\n",
    )?;
    fs::write(
        data.join("encoder.csv"),
        "time,duration,label\n2.0,1.0,Type 2\n",
    )?;
    let file = dir.path().join("metadata.yml");
    fs::write(
        &file,
        concat!(
            "s1:\n  data_dir: s1\n",
            "  annotations_file: annotations.csv\n",
            "  epoch_encoder_file: encoder.csv\n",
        ),
    )?;

    let mut cmd = cargo_bin_cmd!("sesscat");
    cmd.args(["timeline", "--file", file.to_str().unwrap(), "s1"]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output)?;
    let lines: Vec<&str> = stdout.lines().collect();

    assert_eq!(
        lines[0],
        "Start (s),End (s),Duration (s),Type,Label"
    );
    assert_eq!(lines[1], "0.5,3.0,2.5,Bite,");
    assert_eq!(lines[2], "2.0,3.0,1.0,Type 2,(from epoch encoder file)");
    assert_eq!(lines[3], "4.0,5.0,1.0,Swallow,strong");
    Ok(())
}

#[test]
fn timeline_errors_when_a_referenced_file_is_missing() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    fs::create_dir_all(dir.path().join("s1"))?;
    let file = dir.path().join("metadata.yml");
    fs::write(
        &file,
        "s1:\n  data_dir: s1\n  annotations_file: gone.csv\n",
    )?;

    let mut cmd = cargo_bin_cmd!("sesscat");
    cmd.args(["timeline", "--file", file.to_str().unwrap(), "s1"]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8(output)?.contains("gone.csv"));
    Ok(())
}
