use std::fs;
use std::path::PathBuf;

use badgeserver::{BadgeRequest, BadgeService};
use sha2::{Digest, Sha256};

fn golden_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from("tests/goldens/expected");
    p.push(name);
    p
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn golden_request() -> BadgeRequest {
    BadgeRequest {
        vendor: "build".into(),
        status: "passing".into(),
        color: "green".into(),
        vendor_width: None,
        status_width: None,
    }
}

#[test]
fn svg_output_is_deterministic() {
    let a = BadgeService::with_defaults().unwrap();
    let b = BadgeService::with_defaults().unwrap();
    let req = golden_request();
    assert_eq!(
        digest(&a.render_svg(&req).unwrap()),
        digest(&b.render_svg(&req).unwrap())
    );
}

#[test]
fn golden_svg_matches_fixture() {
    let service = BadgeService::with_defaults().unwrap();
    let svg = service.render_svg(&golden_request()).unwrap();

    let expected_path = golden_path("build-passing.svg.sha256");
    if std::env::var("UPDATE_GOLDENS").is_ok() {
        fs::create_dir_all("tests/goldens/expected").ok();
        fs::write(&expected_path, digest(&svg)).expect("write golden");
        println!("Updated golden: {:?}", expected_path);
        return;
    }

    let exp = fs::read_to_string(&expected_path).unwrap_or_else(|e| {
        panic!(
            "cannot read golden {:?} ({}); run with UPDATE_GOLDENS=1 to create it",
            expected_path, e
        )
    });
    assert_eq!(digest(&svg), exp.trim());
}
