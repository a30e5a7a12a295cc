//! Release fixtures and a mock mirror

use std::io::Write;
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mirror directory for a release: MD5 of the name plus a newline
pub fn release_dir(name: &str) -> String {
    format!("/{:x}/", md5::compute(format!("{}\n", name)))
}

/// Write an APK whose binary manifest declares `package`
pub fn write_apk(path: &Path, package: &str) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let mut manifest = b"\x03\x00\x08\x00".to_vec();
    manifest.extend(package.encode_utf16().flat_map(|u| u.to_le_bytes()));
    writer.start_file("AndroidManifest.xml", options).unwrap();
    writer.write_all(&manifest).unwrap();
    writer.start_file("classes.dex", options).unwrap();
    writer.write_all(b"dex\n035").unwrap();
    writer.finish().unwrap();
}

/// Build a release archive (APK, expansion file, readme); encrypted when a password is given
pub fn build_release_archive(work: &Path, package: &str, password: Option<&str>) -> Vec<u8> {
    let source = work.join("release-src");
    std::fs::create_dir_all(&source).unwrap();
    write_apk(&source.join("game.apk"), package);
    std::fs::write(
        source.join(format!("main.1.{}.obb", package)),
        vec![3u8; 8192],
    )
    .unwrap();
    std::fs::write(source.join("readme.txt"), b"release notes").unwrap();

    let archive = work.join("release.7z");
    match password {
        Some(password) => sevenz_rust::compress_to_path_encrypted(
            &source,
            &archive,
            sevenz_rust::Password::from(password),
        )
        .unwrap(),
        None => sevenz_rust::compress_to_path(&source, &archive).unwrap(),
    }
    std::fs::read(&archive).unwrap()
}

/// Split bytes into `count` numbered parts named `<base>.001`, `<base>.002`, ...
pub fn split_parts(base: &str, bytes: &[u8], count: usize) -> Vec<(String, Vec<u8>)> {
    let chunk = bytes.len().div_ceil(count);
    bytes
        .chunks(chunk)
        .enumerate()
        .map(|(i, part)| (format!("{}.{:03}", base, i + 1), part.to_vec()))
        .collect()
}

/// Serve a release: directory listing, HEAD sizes, and GETs honoring `Range`
pub async fn mount_release(server: &MockServer, name: &str, files: &[(String, Vec<u8>)]) {
    let dir = release_dir(name);
    let mut html = String::from("<html><body><pre><a href=\"../\">../</a>\n");
    for (file, _) in files {
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            urlencoding::encode(file),
            file
        ));
    }
    html.push_str("</pre></body></html>");

    Mock::given(method("GET"))
        .and(path(dir.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;

    for (file, bytes) in files {
        let file_path = format!("{}{}", dir, urlencoding::encode(file));
        Mock::given(method("HEAD"))
            .and(path(file_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(RangeResponder {
                body: bytes.clone(),
            })
            .mount(server)
            .await;
    }
}

/// Answers `Range: bytes=N-` with 206 and the tail, otherwise 200 with the whole body
pub struct RangeResponder {
    /// Full file contents
    pub body: Vec<u8>,
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let start = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.strip_suffix('-'))
            .and_then(|v| v.parse::<usize>().ok());

        match start {
            Some(start) if start >= self.body.len() => ResponseTemplate::new(416).insert_header(
                "Content-Range",
                format!("bytes */{}", self.body.len()).as_str(),
            ),
            Some(start) => ResponseTemplate::new(206)
                .insert_header(
                    "Content-Range",
                    format!(
                        "bytes {}-{}/{}",
                        start,
                        self.body.len() - 1,
                        self.body.len()
                    )
                    .as_str(),
                )
                .set_body_bytes(self.body[start..].to_vec()),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}
