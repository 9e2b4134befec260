//! HTTP transport for dist-git style lookaside caches
//!
//! Downloads are plain GETs under `download_url`. Uploads go to a CGI script
//! at `upload_url` which answers a form without a file part with
//! `Available` or `Missing`, and stores the file when one is attached.

use super::auth::Credentials;
use super::multipart::MultipartForm;
use super::policy::{Attempt, Clock, RetryPolicy, StallGuard, SystemClock};
use super::{CacheLocation, CacheTransport, Direction, NoopObserver, RemoteState, TransferObserver, TransferOutcome, UrlLayout};
use crate::config::schema::CacheConfig;
use crate::error::{LookasideError, LookasideResult};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::DateTime;
use filetime::FileTime;
use std::error::Error as _;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::{Host, Url};

const CHUNK_SIZE: usize = 64 * 1024;

/// Endpoint description, independent of credentials
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub download_url: Url,
    pub upload_url: Option<Url>,
    pub layout: UrlLayout,
    /// Send `namespace/package` rather than `package` as the upload `name`
    pub namespaced_uploads: bool,
    pub policy: RetryPolicy,
}

impl TransportSettings {
    pub fn from_config(cache: &CacheConfig) -> LookasideResult<Self> {
        let download_url = cache
            .download_url
            .as_deref()
            .ok_or_else(|| LookasideError::config_missing("cache.download_url"))?;
        Ok(Self {
            download_url: parse_endpoint(download_url)?,
            upload_url: cache.upload_url.as_deref().map(parse_endpoint).transpose()?,
            layout: cache.layout,
            namespaced_uploads: cache.namespaced_uploads,
            policy: cache.retry_policy(),
        })
    }
}

/// Blocking HTTP client for one cache endpoint
pub struct HttpCacheTransport {
    agent: ureq::Agent,
    settings: TransportSettings,
    credentials: Credentials,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TransferObserver>,
}

impl HttpCacheTransport {
    pub fn new(settings: TransportSettings, credentials: Credentials) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.policy.connect_timeout)
            .timeout_read(settings.policy.stall_timeout)
            .timeout_write(settings.policy.stall_timeout)
            .user_agent(concat!("lookaside/", env!("CARGO_PKG_VERSION")))
            .build();

        Self {
            agent,
            settings,
            credentials,
            clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Build from the `[cache]` config section
    pub fn from_config(cache: &CacheConfig) -> LookasideResult<Self> {
        let settings = TransportSettings::from_config(cache)?;
        let credentials = Credentials::from_mode(cache.auth)?;
        Ok(Self::new(settings, credentials))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn upload_url(&self) -> LookasideResult<&Url> {
        self.settings
            .upload_url
            .as_ref()
            .ok_or_else(|| LookasideError::config_missing("cache.upload_url"))
    }

    fn upload_name(&self, location: &CacheLocation) -> String {
        if self.settings.namespaced_uploads {
            location.qualified_name()
        } else {
            location.package.clone()
        }
    }

    fn authorize(&self, request: ureq::Request, url: &Url) -> LookasideResult<ureq::Request> {
        match &self.credentials {
            Credentials::Anonymous => Ok(request),
            Credentials::Negotiate(provider) => {
                let host = negotiate_host(url).ok_or_else(|| LookasideError::InvalidUrl {
                    url: url.to_string(),
                    reason: "no host".to_string(),
                })?;
                let token = provider.token(&host)?;
                let header = format!("Negotiate {}", BASE64_STANDARD.encode(token));
                Ok(request.set("Authorization", &header))
            }
        }
    }

    fn download_once(
        &self,
        url: &Url,
        location: &CacheLocation,
        destination: &Path,
    ) -> LookasideResult<Attempt<TransferOutcome>> {
        let response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Ok(classify_status(code)),
            Err(ureq::Error::Transport(transport)) => return classify_transport(url.as_str(), &transport),
        };

        let total = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());
        let modified = response.header("Last-Modified").and_then(parse_http_date);
        self.observer.started(&location.filename, Direction::Download, total);

        let mut file = File::create(destination)
            .map_err(|e| LookasideError::io(format!("creating {}", destination.display()), e))?;
        let mut body = StallGuard::new(response.into_reader(), &*self.clock, self.settings.policy.low_speed);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;

        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(file);
                    remove_partial(destination);
                    warn!("Download of {} interrupted after {} bytes: {}", location.filename, written, e);
                    return Ok(classify_io(&e));
                }
            };
            if let Err(e) = file.write_all(&buf[..n]) {
                drop(file);
                remove_partial(destination);
                return Err(LookasideError::io(format!("writing {}", destination.display()), e));
            }
            written += n as u64;
            self.observer.progressed(&location.filename, n as u64);
        }

        file.sync_all()
            .map_err(|e| LookasideError::io(format!("syncing {}", destination.display()), e))?;
        drop(file);

        if let Some(mtime) = modified {
            if let Err(e) = filetime::set_file_mtime(destination, mtime) {
                debug!("Could not set mtime on {}: {}", destination.display(), e);
            }
        }

        debug!("Downloaded {} bytes to {}", written, destination.display());
        Ok(Attempt::Done(TransferOutcome::Success))
    }

    fn check_once(
        &self,
        url: &Url,
        location: &CacheLocation,
    ) -> LookasideResult<Attempt<Result<RemoteState, TransferOutcome>>> {
        let form = MultipartForm::new()
            .text("name", self.upload_name(location))
            .text(format!("{}sum", location.algorithm), location.digest.as_str())
            .text("filename", location.filename.as_str());

        let response = match self.post_form(url, form, classify_status, None)? {
            Ok(response) => response,
            Err(failure) => return Ok(failure.map(Err)),
        };

        let body = match response.into_string() {
            Ok(body) => body,
            Err(e) => return Ok(classify_io(&e).map(Err)),
        };

        match body.trim() {
            "Available" => Ok(Attempt::Done(Ok(RemoteState::Available))),
            "Missing" => Ok(Attempt::Done(Ok(RemoteState::Missing))),
            other => {
                debug!("Unexpected lookaside response: {}", other);
                Ok(Attempt::Done(Err(TransferOutcome::Unavailable {
                    reason: format!("unexpected response while checking for {}", location.filename),
                })))
            }
        }
    }

    fn check_remote(
        &self,
        url: &Url,
        location: &CacheLocation,
    ) -> LookasideResult<Result<RemoteState, TransferOutcome>> {
        self.settings.policy.run(&*self.clock, |attempt| {
            debug!("Checking {} (attempt {})", location.filename, attempt);
            self.check_once(url, location)
        })
    }

    fn upload_once(
        &self,
        url: &Url,
        location: &CacheLocation,
        source: &Path,
    ) -> LookasideResult<Attempt<TransferOutcome>> {
        let form = MultipartForm::new()
            .text("name", self.upload_name(location))
            .text(format!("{}sum", location.algorithm), location.digest.as_str())
            .file("file", location.filename.as_str(), source);

        match self.post_form(url, form, classify_upload_status, Some(&location.filename))? {
            Ok(response) => {
                if let Ok(body) = response.into_string() {
                    if !body.trim().is_empty() {
                        debug!("Upload response: {}", body.trim());
                    }
                }
                Ok(Attempt::Done(TransferOutcome::Success))
            }
            Err(failure) => Ok(failure),
        }
    }

    /// POST a form; `Err` carries the classified failure for the retry loop
    fn post_form(
        &self,
        url: &Url,
        form: MultipartForm,
        classify: fn(u16) -> Attempt<TransferOutcome>,
        progress: Option<&str>,
    ) -> LookasideResult<Result<ureq::Response, Attempt<TransferOutcome>>> {
        let content_type = form.content_type();
        let (len, body) = form.into_reader()?;

        let request = self
            .agent
            .post(url.as_str())
            .set("Content-Type", &content_type)
            .set("Content-Length", &len.to_string());
        let request = self.authorize(request, url)?;

        let sent = match progress {
            Some(filename) => request.send(ProgressReader {
                inner: body,
                observer: &*self.observer,
                filename,
            }),
            None => request.send(body),
        };

        match sent {
            Ok(response) => Ok(Ok(response)),
            Err(ureq::Error::Status(code, _)) => Ok(Err(classify(code))),
            Err(ureq::Error::Transport(transport)) => classify_transport(url.as_str(), &transport).map(Err),
        }
    }
}

impl CacheTransport for HttpCacheTransport {
    fn download(&self, location: &CacheLocation, destination: &Path) -> LookasideResult<TransferOutcome> {
        let url = location.download_url(&self.settings.download_url, self.settings.layout);
        info!("Downloading {}", location.filename);
        debug!("Full URL: {}", url);

        let outcome = self.settings.policy.run(&*self.clock, |attempt| {
            debug!("GET {} (attempt {})", url, attempt);
            self.download_once(&url, location, destination)
        })?;

        if !outcome.is_success() {
            remove_partial(destination);
        }
        self.observer.finished(&location.filename, &outcome);
        Ok(outcome)
    }

    fn upload(&self, location: &CacheLocation, source: &Path) -> LookasideResult<TransferOutcome> {
        let url = self.upload_url()?.clone();

        match self.check_remote(&url, location)? {
            Ok(RemoteState::Available) => {
                info!("File already uploaded: {}", location.filename);
                self.observer.finished(&location.filename, &TransferOutcome::AlreadyPresent);
                return Ok(TransferOutcome::AlreadyPresent);
            }
            Ok(RemoteState::Missing) => {}
            Err(outcome) => {
                self.observer.finished(&location.filename, &outcome);
                return Ok(outcome);
            }
        }

        let size = fs::metadata(source)
            .map_err(|e| LookasideError::io(format!("reading {}", source.display()), e))?
            .len();
        info!("Uploading {}", source.display());
        self.observer
            .started(&location.filename, Direction::Upload, Some(size));

        let outcome = self.settings.policy.run(&*self.clock, |attempt| {
            debug!("POST {} for {} (attempt {})", url, location.filename, attempt);
            self.upload_once(&url, location, source)
        })?;

        self.observer.finished(&location.filename, &outcome);
        Ok(outcome)
    }

    fn exists(&self, location: &CacheLocation) -> LookasideResult<RemoteState> {
        self.check_remote(self.upload_url()?, location)?
            .map_err(|outcome| LookasideError::RemoteCheckFailed {
                filename: location.filename.clone(),
                outcome,
            })
    }
}

/// Counts bytes flowing into a request body
struct ProgressReader<'a, R> {
    inner: R,
    observer: &'a dyn TransferObserver,
    filename: &'a str,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.observer.progressed(self.filename, n as u64);
        }
        Ok(n)
    }
}

fn classify_status(code: u16) -> Attempt<TransferOutcome> {
    match code {
        401 | 403 => Attempt::Done(TransferOutcome::AuthFailure { status: code }),
        404 | 410 => Attempt::Done(TransferOutcome::NotFound),
        408 | 429 | 500..=599 => Attempt::Retry(TransferOutcome::Unavailable {
            reason: format!("server returned status {}", code),
        }),
        _ => Attempt::Done(TransferOutcome::Unavailable {
            reason: format!("server returned status {}", code),
        }),
    }
}

fn classify_upload_status(code: u16) -> Attempt<TransferOutcome> {
    match code {
        // Stored by someone else between the existence check and the upload
        409 => Attempt::Done(TransferOutcome::AlreadyPresent),
        _ => classify_status(code),
    }
}

fn classify_transport(url: &str, transport: &ureq::Transport) -> LookasideResult<Attempt<TransferOutcome>> {
    use ureq::ErrorKind;

    match transport.kind() {
        ErrorKind::InvalidUrl | ErrorKind::UnknownScheme => Err(LookasideError::InvalidUrl {
            url: url.to_string(),
            reason: transport.to_string(),
        }),
        ErrorKind::Io => {
            let io_err = transport.source().and_then(|s| s.downcast_ref::<io::Error>());
            match io_err {
                Some(e) => Ok(classify_io(e)),
                None => Ok(Attempt::Retry(TransferOutcome::Unavailable {
                    reason: transport.to_string(),
                })),
            }
        }
        ErrorKind::Dns | ErrorKind::ConnectionFailed | ErrorKind::ProxyConnect => {
            Ok(Attempt::Retry(TransferOutcome::Unavailable {
                reason: transport.to_string(),
            }))
        }
        _ => Ok(Attempt::Done(TransferOutcome::Unavailable {
            reason: transport.to_string(),
        })),
    }
}

fn classify_io(error: &io::Error) -> Attempt<TransferOutcome> {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Attempt::Retry(TransferOutcome::Timeout),
        _ => Attempt::Retry(TransferOutcome::Unavailable {
            reason: error.to_string(),
        }),
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial download {}: {}", path.display(), e),
    }
}

fn parse_http_date(value: &str) -> Option<FileTime> {
    let parsed = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    Some(FileTime::from_unix_time(parsed.timestamp(), 0))
}

/// Parse a configured endpoint; it must be an http(s) URL with a path
fn parse_endpoint(value: &str) -> LookasideResult<Url> {
    let invalid = |reason: String| LookasideError::InvalidUrl {
        url: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(invalid("no host".to_string()));
    }
    Ok(url)
}

/// Host name for the `HTTP@host` service principal
fn negotiate_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}
