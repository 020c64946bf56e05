use std::fs;

use anyhow::Result;
use insta::assert_snapshot;
use tagpack::Options;

const INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Home</title>
  <link rel="stylesheet" href="css/site.css">
  <style>
    h1 { margin: 0; }
  </style>
</head>
<body>
  <h1>Home</h1>
  <script src="js/a.js"></script>
  <script src="https://cdn.example.com/lib.js"></script>
  <script src="js/b.js" defer></script>
</body>
</html>
"#;

#[test]
fn rewritten_document_matches_snapshot() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("css"))?;
    fs::create_dir_all(src.join("js"))?;
    fs::write(src.join("index.html"), INDEX)?;
    fs::write(src.join("css/site.css"), "h1 { color: red; }")?;
    fs::write(src.join("js/a.js"), "var a = 1;")?;
    fs::write(src.join("js/b.js"), "var b = 2;")?;

    let options = Options {
        src,
        dist: temp.path().join("dist"),
        random_bundle_names: false,
        iife_script: false,
        minify_markup: false,
        ..Options::default()
    };
    tagpack::run(options)?;

    let dist = temp.path().join("dist");
    let index = fs::read_to_string(dist.join("index.html"))?;
    assert_snapshot!("rewritten_index", index.trim_end());
    assert_eq!(
        fs::read_to_string(dist.join("bundles/0.css"))?,
        "h1{color:red;}h1{margin:0;}"
    );
    Ok(())
}
