//! Basis Universal encoder front-end
//!
//! Drives the Emscripten build of the `basisu` command-line encoder through
//! the marshaling core: input images go into the module's filesystem under a
//! generated temporary name, `main` runs with the mapped flags, and the
//! produced container is read back out. Both temporary entries are deleted
//! whether the call succeeds or fails.

use serde::{Deserialize, Serialize};

use crate::bridge::{Bridge, BridgeResult, ModuleConfig, ModuleInstance, temp_name, temp_token};

#[cfg(target_arch = "wasm32")]
use crate::bridge::EmscriptenModule;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsValue;

use std::future::Future;

/// Settings for KTX2 packing.
///
/// These map one-to-one onto `basisu` command-line flags and are plain data
/// so asset pipelines can persist them alongside their other build settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackOptions {
    /// UASTC texture mode instead of the default ETC1S: significantly
    /// higher quality, larger files
    pub uastc: bool,
    /// UASTC encoding level, range 0..=4; higher is slower but better
    pub uastc_level: Option<u8>,
    /// Store UASTC data uncompressed instead of Zstandard-compressed
    pub ktx2_no_zstandard: bool,
    /// Linear colorspace metrics and mipmap filtering instead of sRGB
    pub linear: bool,
    /// Flip input images vertically before compression
    pub y_flip: bool,
    /// Tune codec parameters for normal maps
    pub normal_map: bool,
}

impl PackOptions {
    /// The `basisu` argument list these options map to (input path excluded)
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-ktx2".to_string(), "-mipmap".to_string()];
        if self.uastc {
            args.push("-uastc".to_string());
        }
        if self.ktx2_no_zstandard {
            args.push("-ktx2_no_zstandard".to_string());
        }
        if self.linear {
            args.push("-linear".to_string());
        }
        if let Some(level) = self.uastc_level {
            args.push("-uastc_level".to_string());
            args.push(level.to_string());
        }
        if self.y_flip {
            args.push("-y_flip".to_string());
        }
        if self.normal_map {
            args.push("-normal_map".to_string());
        }
        args
    }
}

/// The Basis Universal encoder, driven through a module bridge
pub struct Basisu<M: ModuleInstance> {
    bridge: Bridge<M>,
}

impl<M: ModuleInstance> Basisu<M> {
    /// Create an encoder with an uninitialized bridge
    pub fn new() -> Self {
        Self {
            bridge: Bridge::new(),
        }
    }

    /// Initialize the underlying module (once per encoder)
    pub async fn init<F, Fut>(&mut self, factory: F) -> BridgeResult<()>
    where
        F: FnOnce(ModuleConfig) -> Fut,
        Fut: Future<Output = BridgeResult<M>>,
    {
        self.bridge.init(factory).await
    }

    /// Whether the underlying module is initialized
    pub fn is_ready(&self) -> bool {
        self.bridge.is_ready()
    }

    /// The underlying bridge
    pub fn bridge(&self) -> &Bridge<M> {
        &self.bridge
    }

    /// The underlying bridge, mutably
    pub fn bridge_mut(&mut self) -> &mut Bridge<M> {
        &mut self.bridge
    }

    /// Pack an image into a KTX2 container.
    ///
    /// `ext` is the input's file extension including the dot (e.g. `".png"`);
    /// the encoder dispatches on it.
    pub fn pack_ktx2(
        &mut self,
        image: &[u8],
        ext: &str,
        options: &PackOptions,
    ) -> BridgeResult<Vec<u8>> {
        let base = temp_token();
        let in_path = format!("{}{}", base, ext);
        let out_path = format!("{}.ktx2", base);

        let result = self.run_pack(&in_path, &out_path, image, options);
        self.clean_files(&[&in_path, &out_path]);
        result
    }

    fn run_pack(
        &mut self,
        in_path: &str,
        out_path: &str,
        image: &[u8],
        options: &PackOptions,
    ) -> BridgeResult<Vec<u8>> {
        self.bridge.fs()?.write(in_path, image)?;

        let mut args = options.to_args();
        args.push(in_path.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.bridge.call_cli("main", &arg_refs)?;

        self.bridge.fs()?.read(out_path)
    }

    /// Print information about an image without producing output
    pub fn info(&mut self, image: &[u8], ext: &str) -> BridgeResult<()> {
        let in_path = temp_name(ext);

        let result = self.run_info(&in_path, image);
        self.clean_files(&[&in_path]);
        result
    }

    fn run_info(&mut self, in_path: &str, image: &[u8]) -> BridgeResult<()> {
        self.bridge.fs()?.write(in_path, image)?;
        self.bridge.call_cli("main", &["-info", in_path])
    }

    /// Best-effort deletion of the temp entries this encoder created.
    ///
    /// Safe to run after a partial failure: entries that were never written
    /// are skipped, and a failed delete does not mask the original error.
    fn clean_files(&mut self, paths: &[&str]) {
        let Ok(mut fs) = self.bridge.fs() else {
            return;
        };
        for path in paths {
            if fs.exists(path) {
                let _ = fs.remove(path);
            }
        }
    }
}

impl<M: ModuleInstance> Default for Basisu<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "wasm32")]
impl Basisu<EmscriptenModule> {
    /// Initialize from a JS Emscripten factory function
    pub async fn init_from_factory(&mut self, factory: JsValue) -> BridgeResult<()> {
        self.bridge
            .init(move |config| async move { EmscriptenModule::instantiate(&factory, config).await })
            .await
    }
}
