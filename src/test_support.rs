//! Fixtures shared by the unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use glam::UVec2;

use crate::headless::HeadlessHost;
use crate::host::{CameraMask, RenderHost};
use crate::lights::LightVolumes;
use crate::shader_library::ShaderLibrary;
use crate::value::Defines;

pub(crate) const VERSION_LINE: &str = "#version 140";

/// Every shader the deferred renderer itself loads.
pub(crate) const PIPELINE_SHADERS: &[&str] = &[
    "geometry",
    "light",
    "light_shadow",
    "forward",
    "spot_light",
    "spot_light_shadow",
];

/// A temporary shader root with `shaders/{name}_v.glsl` / `_f.glsl` pairs.
pub(crate) struct ShaderDir {
    dir: tempfile::TempDir,
}

impl ShaderDir {
    pub fn new(names: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shaders")).unwrap();
        let shaders = Self { dir };
        for name in names {
            shaders.add(name);
        }
        shaders
    }

    /// A shader root holding the pipeline shaders plus `extra`.
    pub fn with_pipeline(extra: &[&str]) -> Self {
        let shaders = Self::new(PIPELINE_SHADERS);
        for name in extra {
            shaders.add(name);
        }
        shaders
    }

    pub fn add(&self, name: &str) {
        for (path, body) in [
            (self.vertex(name), "void main() { gl_Position = vec4(0.0); }"),
            (self.fragment(name), "out vec4 color;\nvoid main() { color = vec4(1.0); }"),
        ] {
            fs::write(path, format!("{VERSION_LINE}\n{body}\n")).unwrap();
        }
    }

    /// Writes a fragment source without a version line.
    pub fn add_unversioned(&self, name: &str) {
        fs::write(self.vertex(name), "void main() {}\n").unwrap();
        fs::write(self.fragment(name), "void main() {}\n").unwrap();
    }

    pub fn remove(&self, name: &str) {
        let _ = fs::remove_file(self.vertex(name));
        let _ = fs::remove_file(self.fragment(name));
    }

    /// Appends to the fragment source and pushes its mtime forward.
    pub fn touch(&self, name: &str, extra: &str) {
        let path = self.fragment(name);
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str(extra);
        fs::write(&path, text).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn library(&self) -> ShaderLibrary {
        ShaderLibrary::new(self.root())
    }

    fn vertex(&self, name: &str) -> PathBuf {
        self.root().join(format!("shaders/{name}_v.glsl"))
    }

    fn fragment(&self, name: &str) -> PathBuf {
        self.root().join(format!("shaders/{name}_f.glsl"))
    }
}

/// An 800x600 headless host.
pub(crate) fn host() -> HeadlessHost {
    HeadlessHost::new(UVec2::new(800, 600))
}

/// A light root under `render` with the default volume models and mask bits.
pub(crate) fn light_volumes(host: &mut HeadlessHost) -> LightVolumes {
    let render = host.render_root();
    LightVolumes {
        root: host.create_node("light_root", Some(render)),
        scene_root: render,
        shading: Defines::new(),
        shadow_mask: CameraMask::bit(13),
        sphere_model: "models/sphere".to_string(),
        cone_model: "models/cone".to_string(),
    }
}
