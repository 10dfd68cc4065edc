//! Integration tests running the `gmlstream` binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const PARKS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" xmlns:topp="http://www.openplans.org/topp" numberOfFeatures="2">
  <gml:boundedBy>
    <gml:Box srsName="EPSG:4326"><gml:coordinates>0,0 20,10</gml:coordinates></gml:Box>
  </gml:boundedBy>
  <gml:featureMember>
    <topp:parks fid="parks.1">
      <topp:name>Twin Lakes</topp:name>
      <topp:visitors>1200</topp:visitors>
      <topp:the_geom><gml:Point srsName="EPSG:4326"><gml:coordinates>3,4</gml:coordinates></gml:Point></topp:the_geom>
    </topp:parks>
  </gml:featureMember>
  <gml:featureMember>
    <topp:parks fid="parks.2">
      <topp:name>Mill Pond</topp:name>
      <topp:the_geom><gml:LineString><gml:coordinates>0,0 20,10</gml:coordinates></gml:LineString></topp:the_geom>
    </topp:parks>
  </gml:featureMember>
</wfs:FeatureCollection>
"#;

const EXCEPTION: &str = r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1"><ows:Exception><ows:ExceptionText>Feature type unknown</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#;

fn response_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp file");
    file
}

fn gmlstream() -> Command {
    Command::cargo_bin("gmlstream").expect("gmlstream binary should be built")
}

/// Test that `parse` prints every feature with its attributes and WKT.
#[test]
fn test_parse_prints_features() {
    let file = response_file(PARKS);
    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "topp:parks", "--geometry-attribute", "the_geom"])
        .args(["--field", "name", "--field", "visitors:integer"])
        .args(["--chunk-size", "13"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Features (2 of 2)"))
        .stdout(predicate::str::contains("parks.1"))
        .stdout(predicate::str::contains("name=Twin Lakes, visitors=1200"))
        .stdout(predicate::str::contains("POINT"))
        .stdout(predicate::str::contains("LINESTRING"));
}

/// Test that `--limit` stops after the requested number of features.
#[test]
fn test_parse_limit() {
    let file = response_file(PARKS);
    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["-t", "topp:parks", "-g", "the_geom", "--limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("parks.1"))
        .stdout(predicate::str::contains("parks.2").not());
}

/// Test that `info` reports diagnostics and the Arrow schema.
#[test]
fn test_info_reports_diagnostics() {
    let file = response_file(PARKS);
    gmlstream()
        .arg("info")
        .arg(file.path())
        .args(["--typename", "topp:parks", "--geometry-attribute", "the_geom"])
        .args(["--field", "visitors:integer64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EPSG:4326"))
        .stdout(predicate::str::contains("(0, 0) - (20, 10)"))
        .stdout(predicate::str::contains("Number returned"))
        .stdout(predicate::str::contains("Int64"))
        .stdout(predicate::str::contains("Geometry (WKB)"));
}

/// Test that an exception report fails `parse` but is shown by `info`.
#[test]
fn test_exception_report() {
    let file = response_file(EXCEPTION);
    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "topp:parks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Feature type unknown"));

    gmlstream()
        .arg("info")
        .arg(file.path())
        .args(["--typename", "topp:parks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exception"))
        .stdout(predicate::str::contains("Feature type unknown"));
}

/// Test that arcs are linearized by default and left empty with `--skip-curves`.
#[test]
fn test_curved_geometry() {
    let file = response_file(
        r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:topp="http://www.openplans.org/topp"><wfs:member><topp:parks gml:id="parks.9"><topp:the_geom><gml:Curve><gml:segments><gml:Arc><gml:posList>0 0 1 1 2 0</gml:posList></gml:Arc></gml:segments></gml:Curve></topp:the_geom></topp:parks></wfs:member></wfs:FeatureCollection>"#,
    );
    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "topp:parks", "--geometry-attribute", "the_geom"])
        .args(["--arc-segments", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("parks.9"))
        .stdout(predicate::str::contains("LINESTRING"));

    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "topp:parks", "--geometry-attribute", "the_geom"])
        .arg("--skip-curves")
        .assert()
        .success()
        .stdout(predicate::str::contains("parks.9"))
        .stdout(predicate::str::contains("LINESTRING").not());
}

/// Test that malformed XML fails with a line and column.
#[test]
fn test_malformed_response() {
    let file = response_file("<wfs:FeatureCollection xmlns:wfs=\"urn:wfs\">\n<a></b>");
    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

/// Test argument validation for field types and axis policies.
#[test]
fn test_invalid_arguments() {
    let file = response_file(PARKS);
    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "topp:parks", "--field", "name:blob"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("blob"));

    gmlstream()
        .arg("parse")
        .arg(file.path())
        .args(["--typename", "topp:parks", "--axis-policy", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sideways"));
}

/// Test that a missing input file is reported.
#[test]
fn test_missing_file() {
    gmlstream()
        .args(["info", "/nonexistent/response.xml", "--typename", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}
