//! Webcam capture backend
//!
//! Reference [`CaptureBackend`] over desktop hardware: video devices come
//! from nokhwa, audio devices from cpal, movie output is raw frames piped
//! into an FFmpeg child process, and stills are PNG-encoded camera frames.
//!
//! Desktop webcams expose none of the focus/exposure/flash controls, so the
//! devices report empty capability flags and the configuration bracket only
//! provides the exclusivity guarantee.

use super::traits::{
    Authorization, BackendEvent, CaptureBackend, CaptureSession, DeviceCapabilities, DeviceConfig,
    DeviceInfo, DeviceKind, DevicePosition, ExposureMode, FlashMode, FocusMode, InputBinding,
    InputId, OutputId, PointOfInterest, SessionId, StabilizationMode, StillImage, TrackedProperty,
    VideoOrientation,
};
use crate::error::{CaptureError, CaptureResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Enumerate video devices via nokhwa
pub fn available_cameras() -> Vec<DeviceInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };

                DeviceInfo {
                    id,
                    name: info.human_name().to_string(),
                    kind: DeviceKind::Video,
                    // Desktop webcams do not report a placement.
                    position: DevicePosition::Unspecified,
                    capabilities: DeviceCapabilities::default(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Enumerate audio input devices via cpal
pub fn available_audio_inputs() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| DeviceInfo {
                id: format!("audio-{index}"),
                name: device
                    .name()
                    .unwrap_or_else(|_| format!("Audio input {index}")),
                kind: DeviceKind::Audio,
                position: DevicePosition::Unspecified,
                capabilities: DeviceCapabilities::default(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate audio inputs: {:?}", e);
            Vec::new()
        }
    }
}

fn camera_index(id: &str) -> CameraIndex {
    match id.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(id.to_string()),
    }
}

/// Map a nokhwa frame format to the FFmpeg pixel format string
fn ffmpeg_pixel_format(format: FrameFormat) -> &'static str {
    match format {
        FrameFormat::YUYV => "yuyv422",
        FrameFormat::NV12 => "nv12",
        FrameFormat::RAWRGB => "rgb24",
        FrameFormat::MJPEG => "mjpeg",
        _ => {
            tracing::warn!("Unknown camera format {:?}, falling back to yuyv422", format);
            "yuyv422"
        }
    }
}

/// FFmpeg encoder writing an H.264 movie file
///
/// Raw frames in the camera's native pixel format go to stdin; FFmpeg does
/// the conversion and containerization.
struct FfmpegMovieWriter {
    process: Mutex<Option<Child>>,
    frame_count: AtomicU64,
    running: AtomicBool,
    path: PathBuf,
}

impl FfmpegMovieWriter {
    fn new(
        width: u32,
        height: u32,
        fps: u32,
        pixel_format: &str,
        path: &Path,
    ) -> Result<Self, std::io::Error> {
        let output_file = path.to_string_lossy().to_string();

        let process = Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pixel_format",
                pixel_format,
                "-video_size",
                &format!("{width}x{height}"),
                "-framerate",
                &fps.to_string(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
                "-crf",
                "18",
                "-g",
                &(fps * 2).to_string(),
                "-movflags",
                "+faststart",
                &output_file,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(
            "Started FFmpeg movie writer: {}x{} @ {}fps, pixel_format={}, output: {}",
            width,
            height,
            fps,
            pixel_format,
            output_file
        );

        Ok(Self {
            process: Mutex::new(Some(process)),
            frame_count: AtomicU64::new(0),
            running: AtomicBool::new(true),
            path: path.to_path_buf(),
        })
    }

    fn write_frame(&self, data: &[u8]) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }

        let mut guard = self.process.lock();
        if let Some(ref mut process) = *guard {
            if let Some(ref mut stdin) = process.stdin {
                if stdin.write_all(data).is_ok() {
                    self.frame_count.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
            }
        }
        false
    }

    fn finish(&self) -> Result<(), std::io::Error> {
        self.running.store(false, Ordering::Relaxed);

        let mut guard = self.process.lock();
        if let Some(mut process) = guard.take() {
            // Close stdin to signal EOF, then let FFmpeg flush the file.
            drop(process.stdin.take());
            let output = process.wait_with_output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!("FFmpeg exited with status {}: {}", output.status, stderr);
                return Err(std::io::Error::other(format!(
                    "ffmpeg exited with status {}",
                    output.status
                )));
            }
        }

        tracing::info!(
            "FFmpeg movie writer finished: {} frames, output: {}",
            self.frame_count.load(Ordering::Relaxed),
            self.path.display(),
        );
        Ok(())
    }
}

/// Desktop capture backend over nokhwa + cpal + FFmpeg
#[derive(Default)]
pub struct WebcamBackend {
    device_lock: Mutex<()>,
}

impl WebcamBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaptureBackend for WebcamBackend {
    fn authorization(&self, _kind: DeviceKind) -> Authorization {
        // Desktop platforms gate camera access at device-open time; there
        // is no separate consent state to query up front.
        Authorization::Authorized
    }

    async fn request_access(&self, _kind: DeviceKind) -> bool {
        true
    }

    fn enumerate_devices(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        match kind {
            DeviceKind::Video => available_cameras(),
            DeviceKind::Audio => available_audio_inputs(),
        }
    }

    fn make_session(&self) -> CaptureResult<Box<dyn CaptureSession>> {
        Ok(Box::new(WebcamSession::new()))
    }

    fn open_input(&self, device: &DeviceInfo) -> CaptureResult<InputBinding> {
        let present = self
            .enumerate_devices(device.kind)
            .into_iter()
            .any(|candidate| candidate.id == device.id);
        if !present {
            return Err(CaptureError::DeviceUnavailable(device.name.clone()));
        }

        Ok(InputBinding::new(device.clone()))
    }

    fn lock_for_configuration<'a>(
        &'a self,
        device: &DeviceInfo,
    ) -> CaptureResult<Box<dyn DeviceConfig + 'a>> {
        let guard = self
            .device_lock
            .try_lock()
            .ok_or_else(|| CaptureError::ConfigurationLockFailure(device.name.clone()))?;

        Ok(Box::new(WebcamDeviceConfig {
            device: device.name.clone(),
            _guard: guard,
        }))
    }
}

/// Configuration bracket for webcams
///
/// Exclusivity is real; the setters are not, because UVC webcams expose no
/// focus/exposure/flash controls through nokhwa.
struct WebcamDeviceConfig<'a> {
    device: String,
    _guard: parking_lot::MutexGuard<'a, ()>,
}

impl DeviceConfig for WebcamDeviceConfig<'_> {
    fn set_flash_mode(&mut self, mode: FlashMode) {
        tracing::debug!(device = %self.device, ?mode, "flash mode not supported on this device");
    }

    fn set_focus(&mut self, mode: FocusMode, point: PointOfInterest) {
        tracing::debug!(device = %self.device, ?mode, ?point, "focus point not supported on this device");
    }

    fn set_exposure(&mut self, mode: ExposureMode, point: PointOfInterest) {
        tracing::debug!(device = %self.device, ?mode, ?point, "exposure point not supported on this device");
    }

    fn set_subject_area_monitoring(&mut self, enabled: bool) {
        tracing::debug!(device = %self.device, enabled, "subject-area monitoring not supported on this device");
    }
}

#[derive(Default)]
struct WebcamState {
    video_input: Option<InputBinding>,
    audio_input: Option<InputBinding>,
    movie_output: Option<OutputId>,
    still_output: Option<OutputId>,
    orientations: Vec<(OutputId, VideoOrientation)>,
}

/// Capture session over one webcam and one (tracked) audio input
pub struct WebcamSession {
    id: SessionId,
    state: Mutex<WebcamState>,
    events: broadcast::Sender<BackendEvent>,
    running: AtomicBool,
    recording: Arc<AtomicBool>,
    capture_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WebcamSession {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            id: SessionId::new(),
            state: Mutex::new(WebcamState::default()),
            events,
            running: AtomicBool::new(false),
            recording: Arc::new(AtomicBool::new(false)),
            capture_thread: Mutex::new(None),
        }
    }

    fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    fn emit_property(&self, property: TrackedProperty, old: bool, new: bool) {
        self.emit(BackendEvent::PropertyChanged { property, old, new });
    }

    fn orientation_for(&self, output: OutputId) -> VideoOrientation {
        self.state
            .lock()
            .orientations
            .iter()
            .find(|(id, _)| *id == output)
            .map(|(_, orientation)| *orientation)
            .unwrap_or_default()
    }

    fn join_capture_thread(&self) {
        if let Some(handle) = self.capture_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl CaptureSession for WebcamSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn begin_configuration(&self) {
        tracing::trace!("configuration boundary opened");
    }

    fn commit_configuration(&self) {
        tracing::trace!("configuration boundary committed");
    }

    fn add_input(&self, binding: &InputBinding) -> CaptureResult<()> {
        let mut state = self.state.lock();
        let slot = match binding.device.kind {
            DeviceKind::Video => &mut state.video_input,
            DeviceKind::Audio => &mut state.audio_input,
        };

        if slot.is_some() {
            return Err(CaptureError::DeviceBusyOrAtCapacity(format!(
                "session already has a {} input",
                binding.device.kind
            )));
        }

        *slot = Some(binding.clone());
        Ok(())
    }

    fn remove_input(&self, id: InputId) {
        let mut state = self.state.lock();
        if state.video_input.as_ref().map(|b| b.id) == Some(id) {
            state.video_input = None;
        }
        if state.audio_input.as_ref().map(|b| b.id) == Some(id) {
            state.audio_input = None;
        }
    }

    fn add_still_output(&self) -> CaptureResult<OutputId> {
        let mut state = self.state.lock();
        if state.still_output.is_some() {
            return Err(CaptureError::DeviceBusyOrAtCapacity(
                "still output already attached".to_string(),
            ));
        }
        let id = OutputId::new();
        state.still_output = Some(id);
        Ok(id)
    }

    fn add_movie_output(&self) -> CaptureResult<OutputId> {
        let mut state = self.state.lock();
        if state.movie_output.is_some() {
            return Err(CaptureError::DeviceBusyOrAtCapacity(
                "movie output already attached".to_string(),
            ));
        }
        let id = OutputId::new();
        state.movie_output = Some(id);
        Ok(id)
    }

    fn supports_stabilization(&self, _output: OutputId) -> bool {
        false
    }

    fn set_stabilization(&self, _output: OutputId, mode: StabilizationMode) {
        tracing::debug!(?mode, "stabilization not supported by this backend");
    }

    fn set_output_orientation(&self, output: OutputId, orientation: VideoOrientation) {
        let mut state = self.state.lock();
        state.orientations.retain(|(id, _)| *id != output);
        state.orientations.push((output, orientation));
    }

    fn start_running(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.emit_property(TrackedProperty::SessionRunning, false, true);
        }
    }

    fn stop_running(&self) {
        // An in-flight recording does not outlive the session.
        if self.recording.load(Ordering::SeqCst) {
            self.recording.store(false, Ordering::SeqCst);
            self.join_capture_thread();
        }

        if self.running.swap(false, Ordering::SeqCst) {
            self.emit_property(TrackedProperty::SessionRunning, true, false);
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start_recording(&self, output: OutputId, path: &Path) -> CaptureResult<()> {
        if self.recording.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRecording);
        }

        let device = match self.state.lock().video_input.as_ref() {
            Some(binding) => binding.device.clone(),
            None => {
                self.recording.store(false, Ordering::SeqCst);
                return Err(CaptureError::DeviceUnavailable(
                    "no video input attached".to_string(),
                ));
            }
        };

        // TODO: reopen the capture thread on the new device when the video
        // input is switched mid-recording; today the writer keeps draining
        // the camera it started on.
        let index = camera_index(&device.id);
        let recording = self.recording.clone();
        let events = self.events.clone();
        let path = path.to_path_buf();

        let handle = std::thread::spawn(move || {
            let fail = |message: String| {
                tracing::error!(%message, "movie capture failed");
                recording.store(false, Ordering::SeqCst);
                let _ = events.send(BackendEvent::MovieFinished {
                    output,
                    path: path.clone(),
                    error: Some(message),
                });
            };

            let format =
                RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
            let mut camera = match Camera::new(index.clone(), format) {
                Ok(camera) => camera,
                Err(e) => return fail(format!("failed to open camera {index:?}: {e:?}")),
            };

            if let Err(e) = camera.open_stream() {
                return fail(format!("failed to open camera stream: {e:?}"));
            }

            // The writer is created after opening the stream so it sees the
            // actual negotiated resolution, framerate, and frame format.
            let camera_format = camera.camera_format();
            let width = camera_format.resolution().width();
            let height = camera_format.resolution().height();
            let fps = camera_format.frame_rate();
            let pixel_format = ffmpeg_pixel_format(camera_format.format());

            let writer =
                match FfmpegMovieWriter::new(width, height, fps, pixel_format, &path) {
                    Ok(writer) => writer,
                    Err(e) => {
                        let _ = camera.stop_stream();
                        return fail(format!("failed to start FFmpeg writer: {e}"));
                    }
                };

            let _ = events.send(BackendEvent::PropertyChanged {
                property: TrackedProperty::MovieRecordingActive,
                old: false,
                new: true,
            });
            tracing::info!(
                "movie capture started: {}x{} @ {}fps ({})",
                width,
                height,
                fps,
                pixel_format
            );

            while recording.load(Ordering::SeqCst) {
                // The camera paces the loop; frames are passed to FFmpeg in
                // their native format, no CPU-side conversion.
                match camera.frame() {
                    Ok(frame) => {
                        writer.write_frame(frame.buffer());
                    }
                    Err(e) => {
                        tracing::debug!("Failed to capture frame: {:?}", e);
                    }
                }
            }

            if let Err(e) = camera.stop_stream() {
                tracing::warn!("Error stopping camera stream: {:?}", e);
            }

            let error = writer.finish().err().map(|e| e.to_string());
            let _ = events.send(BackendEvent::PropertyChanged {
                property: TrackedProperty::MovieRecordingActive,
                old: true,
                new: false,
            });
            let _ = events.send(BackendEvent::MovieFinished {
                output,
                path,
                error,
            });
        });

        *self.capture_thread.lock() = Some(handle);
        Ok(())
    }

    async fn stop_recording(&self, _output: OutputId) {
        if !self.recording.swap(false, Ordering::SeqCst) {
            tracing::debug!("stop requested with no recording in flight");
        }
        // The capture thread emits the finish event while flushing; joining
        // here keeps stop-then-restart sequences well ordered.
        self.join_capture_thread();
    }

    async fn capture_still(&self, output: OutputId) -> CaptureResult<StillImage> {
        if self.recording.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceBusyOrAtCapacity(
                "camera is busy recording".to_string(),
            ));
        }

        let device = self
            .state
            .lock()
            .video_input
            .as_ref()
            .map(|binding| binding.device.clone())
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable("no video input attached".to_string())
            })?;
        let orientation = self.orientation_for(output);

        self.emit_property(TrackedProperty::StillCaptureInProgress, false, true);

        let index = camera_index(&device.id);
        let result = tokio::task::spawn_blocking(move || grab_still_frame(index)).await;

        self.emit_property(TrackedProperty::StillCaptureInProgress, true, false);

        let bytes = result
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))??;
        Ok(StillImage { bytes, orientation })
    }

    fn events(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}

/// Open the camera, expose one frame, and PNG-encode it
fn grab_still_frame(index: CameraIndex) -> CaptureResult<Vec<u8>> {
    let format = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = Camera::new(index, format)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to open camera: {e:?}")))?;
    camera
        .open_stream()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to open stream: {e:?}")))?;

    let frame = camera
        .frame()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to capture frame: {e:?}")))?;
    let decoded = frame
        .decode_image::<RgbAFormat>()
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to decode frame: {e:?}")))?;

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }

    encode_png(decoded.width(), decoded.height(), decoded.as_raw())
}

fn encode_png(width: u32, height: u32, rgba: &[u8]) -> CaptureResult<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(std::io::Error::from)?;
        writer
            .write_image_data(rgba)
            .map_err(std::io::Error::from)?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_index_parses_numeric_ids() {
        assert_eq!(camera_index("2"), CameraIndex::Index(2));
        assert_eq!(
            camera_index("FaceTime HD"),
            CameraIndex::String("FaceTime HD".to_string())
        );
    }

    #[test]
    fn unknown_frame_formats_fall_back_to_yuyv() {
        assert_eq!(ffmpeg_pixel_format(FrameFormat::YUYV), "yuyv422");
        assert_eq!(ffmpeg_pixel_format(FrameFormat::NV12), "nv12");
        assert_eq!(ffmpeg_pixel_format(FrameFormat::GRAY), "yuyv422");
    }

    #[test]
    fn png_encoding_round_trips_header() {
        let rgba = vec![255u8; 2 * 2 * 4];
        let bytes = encode_png(2, 2, &rgba).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[tokio::test]
    async fn session_rejects_a_second_input_per_kind() {
        let session = WebcamSession::new();
        let device = DeviceInfo {
            id: "0".to_string(),
            name: "webcam".to_string(),
            kind: DeviceKind::Video,
            position: DevicePosition::Unspecified,
            capabilities: DeviceCapabilities::default(),
        };

        session.add_input(&InputBinding::new(device.clone())).unwrap();
        let err = session
            .add_input(&InputBinding::new(device))
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBusyOrAtCapacity(_)));
    }

    #[tokio::test]
    async fn outputs_attach_once() {
        let session = WebcamSession::new();
        session.add_movie_output().unwrap();
        assert!(session.add_movie_output().is_err());
        session.add_still_output().unwrap();
        assert!(session.add_still_output().is_err());
    }
}
