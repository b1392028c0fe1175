use crate::io::isce::{write_isce_raster, IsceXmlFixer, MetadataFixup, ISCE_DRIVER};
use crate::types::{
    BoundingBox, ByteImage, GeoTransform, RasterProfile, WaterMaskError, WaterMaskResult, WATER,
};
use gdal::spatial_ref::SpatialRef;
use ndarray::{s, Array2};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hops allowed between the data host and the login host for one tile
const MAX_REDIRECTS: usize = 10;

/// Downloads a water body boundary raster for a lat/lon box
pub trait BoundaryDownloader: Send + Sync {
    /// Write the raster into `output_dir` and return its file name
    fn download(
        &self,
        south: f64,
        north: f64,
        west: f64,
        east: f64,
        output_dir: &Path,
    ) -> WaterMaskResult<String>;
}

/// SRTM Water Body Data download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwbdConfig {
    /// Directory holding `{tile}.SRTMSWBD.raw.zip` archives
    pub base_url: String,
    /// Earthdata login prefix; credentials are only sent to URLs under it
    pub auth_url: String,
    /// Extracted `.raw` tiles are kept here between runs
    pub cache_dir: PathBuf,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Tile spacing; tiles hold `samples_per_degree + 1` samples per side
    pub samples_per_degree: usize,
}

impl Default for SwbdConfig {
    fn default() -> Self {
        Self {
            base_url: "https://e4ftl01.cr.usgs.gov/MEASURES/SRTMSWBD.003/2000.02.11".to_string(),
            auth_url: "https://urs.earthdata.nasa.gov/".to_string(),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("watermask")
                .join("swbd"),
            username: None,
            password: None,
            timeout_secs: 300, // 5 minutes
            max_retries: 3,
            retry_delay_secs: 2,
            samples_per_degree: 3600, // 1 arcsecond
        }
    }
}

impl SwbdConfig {
    /// Pick up NASA Earthdata credentials from `EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD`
    pub fn with_env_credentials(mut self) -> Self {
        let user = std::env::var("EARTHDATA_USERNAME");
        let pass = std::env::var("EARTHDATA_PASSWORD");
        if let (Ok(user), Ok(pass)) = (user, pass) {
            self.username = Some(user);
            self.password = Some(pass);
        }
        self
    }

    fn tile_samples(&self) -> usize {
        self.samples_per_degree + 1
    }
}

/// SRTM tile name for the cell whose south-west corner is (`lat`, `lon`)
pub fn tile_name(lat: i32, lon: i32) -> String {
    format!("{}{}", lat_label(lat), lon_label(lon))
}

/// Name of the mosaic written for a box, e.g. `swbdLat_N19_N21_Lon_E009_E011.wbd`
pub fn output_name(south: i32, north: i32, west: i32, east: i32) -> String {
    format!(
        "swbdLat_{}_{}_Lon_{}_{}.wbd",
        lat_label(south),
        lat_label(north),
        lon_label(west),
        lon_label(east)
    )
}

fn lat_label(lat: i32) -> String {
    format!("{}{:02}", if lat >= 0 { "N" } else { "S" }, lat.abs())
}

fn lon_label(lon: i32) -> String {
    format!("{}{:03}", if lon >= 0 { "E" } else { "W" }, lon.abs())
}

/// Downloads SRTMSWBD tiles, mosaics them and writes an ISCE `.wbd` image
pub struct SwbdDownloader {
    config: SwbdConfig,
}

impl SwbdDownloader {
    pub fn new() -> Self {
        Self::with_config(SwbdConfig::default().with_env_credentials())
    }

    pub fn with_config(config: SwbdConfig) -> Self {
        Self { config }
    }

    fn cache_path(&self, tile: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{}.raw", tile))
    }

    /// Local path of a tile, downloading it when not cached.
    /// `None` means the archive does not exist, which SWBD uses for open ocean.
    fn ensure_tile(&self, client: &Client, tile: &str) -> WaterMaskResult<Option<PathBuf>> {
        let cache_path = self.cache_path(tile);
        if cache_path.exists() {
            log::info!("SWBD tile {} already cached, skipping download", tile);
            return Ok(Some(cache_path));
        }

        let base_url = self.config.base_url.trim_end_matches('/');
        let url = format!("{}/{}.SRTMSWBD.raw.zip", base_url, tile);
        match self.download_with_retries(client, &url)? {
            Some(archive) => {
                std::fs::create_dir_all(&self.config.cache_dir)?;
                Self::extract_raw(&archive, &cache_path)?;
                Ok(Some(cache_path))
            }
            None => {
                log::info!("SWBD tile {} not published, treating it as water", tile);
                Ok(None)
            }
        }
    }

    fn download_with_retries(
        &self,
        client: &Client,
        url: &str,
    ) -> WaterMaskResult<Option<Vec<u8>>> {
        let max_retries = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            log::debug!("Download attempt {} of {}: {}", attempt, max_retries, url);

            match self.try_download_once(client, url) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        log::warn!("Download attempt {} failed, retrying...", attempt);
                        let delay = std::time::Duration::from_secs(self.config.retry_delay_secs);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WaterMaskError::Download(format!("{}: download failed after all retries", url))
        }))
    }

    /// Fetch one archive, following the Earthdata login redirects by hand.
    /// The session cookie set by the login host is kept in the client's cookie store.
    fn try_download_once(&self, client: &Client, url: &str) -> WaterMaskResult<Option<Vec<u8>>> {
        let mut target = Url::parse(url)
            .map_err(|e| WaterMaskError::Download(format!("invalid URL {}: {}", url, e)))?;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = client.get(target.clone());
            if let Some(user) = self.credentials_for(&target) {
                log::debug!("Sending Earthdata credentials to {}", target);
                request = request.basic_auth(user, self.config.password.as_ref());
            }

            let response = request
                .send()
                .map_err(|e| WaterMaskError::Download(format!("HTTP request failed: {}", e)))?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        let msg = format!("HTTP {} without Location: {}", status, target);
                        WaterMaskError::Download(msg)
                    })?;
                target = response.url().join(location).map_err(|e| {
                    WaterMaskError::Download(format!("bad redirect {}: {}", location, e))
                })?;
                log::debug!("Redirected to {}", target);
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(WaterMaskError::Download(format!(
                    "HTTP {} {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                    target
                )));
            }

            let content = response.bytes().map_err(|e| {
                WaterMaskError::Download(format!("Failed to read response body: {}", e))
            })?;
            log::debug!("Downloaded {} bytes", content.len());
            return Ok(Some(content.to_vec()));
        }

        Err(WaterMaskError::Download(format!("{}: more than {} redirects", url, MAX_REDIRECTS)))
    }

    fn credentials_for(&self, url: &Url) -> Option<&String> {
        self.config
            .username
            .as_ref()
            .filter(|_| url.as_str().starts_with(&self.config.auth_url))
    }

    /// Extract the `.raw` member of a SWBD archive
    fn extract_raw(zip_data: &[u8], output_path: &Path) -> WaterMaskResult<()> {
        use std::io::Cursor;
        use zip::ZipArchive;

        let mut archive = ZipArchive::new(Cursor::new(zip_data))
            .map_err(|e| WaterMaskError::Download(format!("Failed to open ZIP archive: {}", e)))?;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| {
                WaterMaskError::Download(format!("Failed to read ZIP entry {}: {}", i, e))
            })?;

            if file.name().ends_with(".raw") {
                log::debug!("Extracting {}", file.name());
                let mut buffer = Vec::new();
                std::io::copy(&mut file, &mut buffer)?;
                std::fs::write(output_path, buffer)?;
                return Ok(());
            }
        }

        Err(WaterMaskError::Download("No .raw file found in ZIP archive".to_string()))
    }

    fn read_tile(&self, path: &Path) -> WaterMaskResult<ByteImage> {
        let samples = self.config.tile_samples();
        let data = std::fs::read(path)?;
        Array2::from_shape_vec((samples, samples), data).map_err(|e| {
            WaterMaskError::Processing(format!(
                "{} is not a {}x{} tile: {}",
                path.display(),
                samples,
                samples,
                e
            ))
        })
    }

    /// Mosaic every tile of the integer box into one water raster (255 = water)
    pub fn mosaic(
        &self,
        south: i32,
        north: i32,
        west: i32,
        east: i32,
    ) -> WaterMaskResult<ByteImage> {
        let spd = self.config.samples_per_degree;
        let tile_samples = self.config.tile_samples();
        let height = (north - south) as usize * spd + 1;
        let width = (east - west) as usize * spd + 1;
        log::info!("Mosaicking SWBD tiles into a {}x{} grid", width, height);

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .user_agent(concat!("watermask/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .build()
            .map_err(|e| WaterMaskError::Download(format!("Failed to create HTTP client: {}", e)))?;

        let mut mosaic = Array2::<u8>::zeros((height, width));
        for lat in south..north {
            for lon in west..east {
                let tile = tile_name(lat, lon);
                let row = (north - 1 - lat) as usize * spd;
                let col = (lon - west) as usize * spd;
                let rows = row..row + tile_samples;
                let cols = col..col + tile_samples;
                let mut target = mosaic.slice_mut(s![rows, cols]);

                match self.ensure_tile(&client, &tile)? {
                    Some(path) => {
                        let data = self.read_tile(&path)?;
                        target.zip_mut_with(&data, |out, &v| {
                            if v != 0 {
                                *out = WATER;
                            }
                        });
                    }
                    None => target.fill(WATER),
                }
            }
        }

        Ok(mosaic)
    }
}

impl Default for SwbdDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryDownloader for SwbdDownloader {
    fn download(
        &self,
        south: f64,
        north: f64,
        west: f64,
        east: f64,
        output_dir: &Path,
    ) -> WaterMaskResult<String> {
        let (s, n) = (south.floor() as i32, north.ceil() as i32);
        let (w, e) = (west.floor() as i32, east.ceil() as i32);
        if s >= n || w >= e {
            return Err(WaterMaskError::InvalidExtent(format!(
                "empty SWBD request: south={} north={} west={} east={}",
                south, north, west, east
            )));
        }

        log::info!("Downloading SWBD water mask for S{} N{} W{} E{}", s, n, w, e);
        let mosaic = self.mosaic(s, n, w, e)?;

        let spacing = 1.0 / self.config.samples_per_degree as f64;
        let bbox = BoundingBox {
            min_lon: w as f64 - spacing / 2.0,
            max_lon: e as f64 + spacing / 2.0,
            min_lat: s as f64 - spacing / 2.0,
            max_lat: n as f64 + spacing / 2.0,
        };
        let (height, width) = mosaic.dim();
        let profile = RasterProfile {
            width,
            height,
            count: 1,
            crs: Some(SpatialRef::from_epsg(4326)?.to_wkt()?),
            transform: GeoTransform::north_up(&bbox, spacing, spacing),
            nodata: None,
            driver: ISCE_DRIVER.to_string(),
        };

        std::fs::create_dir_all(output_dir)?;
        let filename = output_name(s, n, w, e);
        let path = output_dir.join(&filename);
        write_isce_raster(&path, mosaic.view(), &profile)?;
        IsceXmlFixer::default().fix(&path)?;

        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Cursor, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// (path, sent Authorization, sent session cookie) for every request the fixture served
    type Seen = Arc<Mutex<Vec<(String, bool, bool)>>>;

    fn zipped_tile(name: &str, data: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(name, zip::write::FileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap().into_inner()
    }

    /// Local stand-in for the SWBD data host and the Earthdata login host.
    /// Data under `/data/` needs the session cookie, which `/urs/authorize`
    /// hands out for `user:pass` before bouncing back through `/data/callback`.
    fn spawn_earthdata_server(archives: Vec<(String, Vec<u8>)>) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let root = format!("http://{}", listener.local_addr().unwrap());
        let seen: Seen = Arc::default();
        let record = seen.clone();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let target = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (mut authorized, mut has_auth, mut has_cookie) = (false, false, false);
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                    let line = line.trim_end().to_ascii_lowercase();
                    if let Some(value) = line.strip_prefix("authorization:") {
                        has_auth = true;
                        // base64("user:pass")
                        authorized = value.trim() == "basic dxnlcjpwyxnz";
                    }
                    if line.starts_with("cookie:") && line.contains("session=ok") {
                        has_cookie = true;
                    }
                }

                let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
                let next = query.strip_prefix("next=").unwrap_or("/").to_string();
                record.lock().unwrap().push((path.to_string(), has_auth, has_cookie));

                let (status, headers, body) = if path == "/urs/authorize" {
                    if authorized {
                        let location = format!("/data/callback?next={}", next);
                        let headers = format!(
                            "Location: {}\r\nSet-Cookie: session=ok; Path=/\r\n",
                            location
                        );
                        ("302 Found", headers, Vec::new())
                    } else {
                        ("401 Unauthorized", String::new(), Vec::new())
                    }
                } else if path == "/data/callback" {
                    ("302 Found", format!("Location: {}\r\n", next), Vec::new())
                } else if !has_cookie {
                    let location = format!("/urs/authorize?next={}", path);
                    ("302 Found", format!("Location: {}\r\n", location), Vec::new())
                } else {
                    match archives.iter().find(|(name, _)| path == format!("/data/{}", name)) {
                        Some((_, bytes)) => ("200 OK", String::new(), bytes.clone()),
                        None => ("404 Not Found", String::new(), Vec::new()),
                    }
                };

                let head = format!(
                    "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    headers,
                    body.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(&body).unwrap();
            }
        });

        (root, seen)
    }

    fn earthdata_config(root: &str, cache_dir: &Path) -> SwbdConfig {
        SwbdConfig {
            base_url: format!("{}/data", root),
            auth_url: format!("{}/urs/", root),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..test_config(cache_dir)
        }
    }

    fn test_config(cache_dir: &Path) -> SwbdConfig {
        SwbdConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            cache_dir: cache_dir.to_path_buf(),
            timeout_secs: 2,
            max_retries: 1,
            retry_delay_secs: 0,
            samples_per_degree: 4,
            ..SwbdConfig::default()
        }
    }

    #[test]
    fn test_tile_and_output_names() {
        assert_eq!(tile_name(19, 9), "N19E009");
        assert_eq!(tile_name(-1, -75), "S01W075");
        assert_eq!(output_name(19, 21, 9, 11), "swbdLat_N19_N21_Lon_E009_E011.wbd");
        assert_eq!(output_name(-34, -33, -71, -70), "swbdLat_S34_S33_Lon_W071_W070.wbd");
    }

    #[test]
    fn test_download_from_cached_tiles() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cache = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();

        // west tile: water in its first row, east tile: dry
        let mut west = vec![0u8; 25];
        west[..5].fill(1);
        std::fs::write(cache.path().join("N10E020.raw"), &west).unwrap();
        std::fs::write(cache.path().join("N10E021.raw"), vec![0u8; 25]).unwrap();

        let downloader = SwbdDownloader::with_config(test_config(cache.path()));
        let mosaic = downloader.mosaic(10, 11, 20, 22).unwrap();
        assert_eq!(mosaic.dim(), (5, 9));
        assert!(mosaic.slice(s![0, 0..5]).iter().all(|&v| v == WATER));
        assert!(mosaic.slice(s![0, 5..]).iter().all(|&v| v == 0));
        assert!(mosaic.slice(s![1.., ..]).iter().all(|&v| v == 0));

        let name = downloader.download(10.0, 11.0, 20.0, 22.0, out.path()).unwrap();
        assert_eq!(name, "swbdLat_N10_N11_Lon_E020_E022.wbd");
        assert!(out.path().join(&name).exists());
        assert!(out.path().join(format!("{}.xml", name)).exists());
        assert!(out.path().join(format!("{}.vrt", name)).exists());
    }

    #[test]
    fn test_unreachable_server_propagates_error() {
        let cache = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let downloader = SwbdDownloader::with_config(test_config(cache.path()));

        let result = downloader.download(10.0, 11.0, 20.0, 21.0, out.path());
        assert!(matches!(result, Err(WaterMaskError::Download(_))));
        assert!(std::fs::read_dir(out.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_wrong_sized_tile_is_rejected() {
        let cache = TempDir::new().unwrap();
        std::fs::write(cache.path().join("N10E020.raw"), vec![0u8; 7]).unwrap();
        let downloader = SwbdDownloader::with_config(test_config(cache.path()));
        assert!(matches!(downloader.mosaic(10, 11, 20, 21), Err(WaterMaskError::Processing(_))));
    }

    #[test]
    fn test_earthdata_login_redirects_keep_session_cookie() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cache = TempDir::new().unwrap();
        let archive = zipped_tile("N10E020.SRTMSWBD.raw", &[0u8; 25]);
        let (root, seen) = spawn_earthdata_server(vec![
            ("N10E020.SRTMSWBD.raw.zip".to_string(), archive),
        ]);

        let downloader = SwbdDownloader::with_config(earthdata_config(&root, cache.path()));
        // N10E020 comes back through the login round trip, N11E020 is unpublished
        let mosaic = downloader.mosaic(10, 12, 20, 21).unwrap();

        assert_eq!(mosaic.dim(), (9, 5));
        assert!(mosaic.slice(s![0..5, ..]).iter().all(|&v| v == WATER));
        assert!(mosaic.slice(s![5.., ..]).iter().all(|&v| v == 0));
        assert!(cache.path().join("N10E020.raw").exists());
        assert!(!cache.path().join("N11E020.raw").exists());

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|(path, auth, _)| path == "/urs/authorize" && *auth));
        assert!(seen
            .iter()
            .filter(|(path, ..)| path.starts_with("/data/"))
            .all(|(_, auth, _)| !auth));
        let tile_fetch = seen
            .iter()
            .filter(|(path, ..)| path == "/data/N10E020.SRTMSWBD.raw.zip")
            .last()
            .unwrap();
        assert!(tile_fetch.2);
    }

    #[test]
    fn test_earthdata_login_without_credentials_fails() {
        let cache = TempDir::new().unwrap();
        let (root, seen) = spawn_earthdata_server(Vec::new());
        let config = SwbdConfig {
            username: None,
            password: None,
            ..earthdata_config(&root, cache.path())
        };

        let result = SwbdDownloader::with_config(config).mosaic(10, 11, 20, 21);
        assert!(matches!(result, Err(WaterMaskError::Download(msg)) if msg.contains("401")));
        assert!(seen.lock().unwrap().iter().all(|(_, auth, _)| !auth));
    }
}
