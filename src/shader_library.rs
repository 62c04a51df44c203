//! Shader source lookup, `#define` injection and the program cache.
//!
//! A logical shader name `X` resolves to a vertex and a fragment source by
//! substituting `X` into two path templates (by default `shaders/{}_v.glsl`
//! and `shaders/{}_f.glsl`) under a shader root directory.
//!
//! Variants are produced textually: for a non-empty define set the library
//! inserts one `#define NAME VALUE` line per entry directly after the
//! source's version line, then hands both sources to the host compiler.
//!
//! # Caching
//!
//! Compiled programs are memoised by `(vertex path, fragment path, define set)`
//! in a bounded least-recently-used cache, so reloading a stage with an
//! unchanged define set never recompiles.
//!
//! # Hot reload
//!
//! Every source the library reads is stamped with its modification time.
//! [`ShaderLibrary::check_modified`] re-reads edited files, evicts every cached
//! program that used them and reports which sources changed, so the caller can
//! reload the stages built from them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::error::{Result, ShaderError};
use crate::host::{ProgramSource, RenderHost, ShaderId};
use crate::value::Defines;

/// Default vertex source template, relative to the shader root.
pub const DEFAULT_VERTEX_TEMPLATE: &str = "shaders/{}_v.glsl";
/// Default fragment source template, relative to the shader root.
pub const DEFAULT_FRAGMENT_TEMPLATE: &str = "shaders/{}_f.glsl";
/// Version line defines are injected after.
pub const DEFAULT_VERSION_LINE: &str = "#version 140";
/// Default number of programs kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Identity of a compiled program variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    /// Define set in canonical (name-sorted) order with rendered values.
    pub defines: BTreeMap<String, String>,
}

impl ProgramKey {
    fn new(vertex: PathBuf, fragment: PathBuf, defines: &Defines) -> Self {
        Self {
            vertex,
            fragment,
            defines: defines
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect(),
        }
    }

    fn uses(&self, path: &Path) -> bool {
        self.vertex == path || self.fragment == path
    }
}

/// Least-recently-used cache of compiled programs.
#[derive(Debug)]
struct ProgramCache {
    capacity: usize,
    /// Oldest first.
    entries: IndexMap<ProgramKey, ShaderId>,
}

impl ProgramCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    fn get(&mut self, key: &ProgramKey) -> Option<ShaderId> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, id)| *id)
    }

    fn insert(&mut self, key: ProgramKey, id: ShaderId) {
        self.entries.shift_remove(&key);
        while self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                log::debug!(
                    "Evicting shader program {}|{}",
                    evicted.vertex.display(),
                    evicted.fragment.display()
                );
            }
        }
        self.entries.insert(key, id);
    }

    fn evict_source(&mut self, path: &Path) {
        self.entries.retain(|key, _| !key.uses(path));
    }
}

/// A shader source read from disk, with the stamp it was read at.
#[derive(Debug)]
struct SourceFile {
    last_modified: SystemTime,
    text: String,
}

impl SourceFile {
    fn read(path: &Path) -> Result<Self, ShaderError> {
        if !path.is_file() {
            return Err(ShaderError::MissingSource(path.to_path_buf()));
        }
        let io_err = |source| ShaderError::Io {
            path: path.to_path_buf(),
            source,
        };
        let text = fs::read_to_string(path).map_err(io_err)?;
        let last_modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(io_err)?;
        Ok(Self {
            last_modified,
            text,
        })
    }

    /// Re-reads the file if it changed on disk. Returns `true` if it did.
    fn refresh(&mut self, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        if modified > self.last_modified {
            if let Ok(text) = fs::read_to_string(path) {
                self.text = text;
                self.last_modified = modified;
                return true;
            }
        }
        false
    }
}

/// Inserts one `#define` line per entry directly after `version`.
///
/// An empty define set leaves the source untouched and does not require the
/// version line to be present.
pub fn inject_defines(
    source: &str,
    version: &str,
    defines: &Defines,
    path: &Path,
) -> Result<String, ShaderError> {
    if defines.is_empty() {
        return Ok(source.to_string());
    }
    if !source.contains(version) {
        return Err(ShaderError::MissingVersionLine {
            path: path.to_path_buf(),
            version: version.to_string(),
        });
    }
    let mut header = format!("{version}\n");
    for (name, value) in defines {
        header.push_str(&format!("#define {name} {value}\n"));
    }
    Ok(source.replacen(version, header.trim_end_matches('\n'), 1))
}

/// Locates, preprocesses and caches shader programs.
#[derive(Debug)]
pub struct ShaderLibrary {
    root: PathBuf,
    vertex_template: String,
    fragment_template: String,
    version_line: String,
    cache: ProgramCache,
    sources: HashMap<PathBuf, SourceFile>,
}

impl ShaderLibrary {
    /// Creates a library resolving the default templates under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            vertex_template: DEFAULT_VERTEX_TEMPLATE.to_string(),
            fragment_template: DEFAULT_FRAGMENT_TEMPLATE.to_string(),
            version_line: DEFAULT_VERSION_LINE.to_string(),
            cache: ProgramCache::new(DEFAULT_CACHE_CAPACITY),
            sources: HashMap::new(),
        }
    }

    /// Overrides the vertex and fragment path templates. `{}` is the shader name.
    pub fn with_templates(mut self, vertex: &str, fragment: &str) -> Self {
        self.vertex_template = vertex.to_string();
        self.fragment_template = fragment.to_string();
        self
    }

    pub fn with_version_line(mut self, version: &str) -> Self {
        self.version_line = version.to_string();
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = ProgramCache::new(capacity);
        self
    }

    /// Vertex and fragment source paths for a logical shader name.
    pub fn source_paths(&self, shader: &str) -> (PathBuf, PathBuf) {
        (
            self.root.join(self.vertex_template.replace("{}", shader)),
            self.root.join(self.fragment_template.replace("{}", shader)),
        )
    }

    /// Returns the program for `shader` specialised by `defines`, compiling it
    /// through the host on a cache miss.
    pub fn load<H: RenderHost + ?Sized>(
        &mut self,
        host: &mut H,
        shader: &str,
        defines: &Defines,
    ) -> Result<ShaderId> {
        let (vertex_path, fragment_path) = self.source_paths(shader);
        let key = ProgramKey::new(vertex_path.clone(), fragment_path.clone(), defines);
        if let Some(id) = self.cache.get(&key) {
            return Ok(id);
        }

        let vertex = self.read_source(&vertex_path)?;
        let vertex = inject_defines(&vertex, &self.version_line, defines, &vertex_path)?;
        let fragment = self.read_source(&fragment_path)?;
        let fragment = inject_defines(&fragment, &self.version_line, defines, &fragment_path)?;

        let program = ProgramSource {
            label: format!("{}|{}", vertex_path.display(), fragment_path.display()),
            vertex,
            fragment,
        };
        let id = host.compile_shader(&program)?;
        log::debug!("Compiled shader '{}' ({} defines) as {:?}", shader, defines.len(), id);
        self.cache.insert(key, id);
        Ok(id)
    }

    fn read_source(&mut self, path: &Path) -> Result<String, ShaderError> {
        let file = SourceFile::read(path)?;
        let text = file.text.clone();
        self.sources.insert(path.to_path_buf(), file);
        Ok(text)
    }

    /// Re-reads every edited source and evicts the programs built from it.
    ///
    /// Returns the paths that changed since they were last read.
    pub fn check_modified(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for (path, file) in &mut self.sources {
            if file.refresh(path) {
                changed.push(path.clone());
            }
        }
        for path in &changed {
            log::info!("Shader source changed: {}", path.display());
            self.cache.evict_source(path);
        }
        changed
    }

    /// Whether `shader` is built from any of the `changed` paths.
    pub fn uses_any(&self, shader: &str, changed: &[PathBuf]) -> bool {
        let (vertex, fragment) = self.source_paths(shader);
        changed.iter().any(|path| *path == vertex || *path == fragment)
    }

    /// Drops every cached program; the next `load` recompiles.
    pub fn clear(&mut self) {
        self.cache.entries.clear();
    }

    /// Number of programs currently cached.
    pub fn cached_programs(&self) -> usize {
        self.cache.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessHost;
    use crate::test_support::{ShaderDir, VERSION_LINE};
    use crate::value::DefineValue;

    #[test]
    fn injects_defines_after_version_line() {
        let mut defines = Defines::new();
        defines.insert("NUM_LIGHTS".into(), DefineValue::Int(2));
        defines.insert("HALFLAMBERT".into(), DefineValue::Float(2.0));

        let source = format!("{VERSION_LINE}\nvoid main() {{}}\n");
        let out = inject_defines(&source, VERSION_LINE, &defines, Path::new("x_f.glsl")).unwrap();
        assert_eq!(
            out,
            "#version 140\n#define NUM_LIGHTS 2\n#define HALFLAMBERT 2.0\nvoid main() {}\n"
        );
    }

    #[test]
    fn injection_requires_version_line_only_with_defines() {
        let source = "void main() {}";
        assert_eq!(
            inject_defines(source, VERSION_LINE, &Defines::new(), Path::new("a")).unwrap(),
            source
        );

        let mut defines = Defines::new();
        defines.insert("DISABLE_SSR".into(), DefineValue::Int(1));
        let err = inject_defines(source, VERSION_LINE, &defines, Path::new("a")).unwrap_err();
        assert!(matches!(err, ShaderError::MissingVersionLine { .. }));
    }

    #[test]
    fn cache_hits_skip_compilation() {
        let dir = ShaderDir::new(&["blur"]);
        let mut host = HeadlessHost::new(glam::UVec2::new(800, 600));
        let mut library = dir.library();

        let mut defines = Defines::new();
        let a = library.load(&mut host, "blur", &defines).unwrap();
        let b = library.load(&mut host, "blur", &defines).unwrap();
        assert_eq!(a, b);
        assert_eq!(host.compile_count(), 1);

        defines.insert("FAST".into(), DefineValue::Int(1));
        let c = library.load(&mut host, "blur", &defines).unwrap();
        assert_ne!(a, c);
        assert_eq!(host.compile_count(), 2);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let dir = ShaderDir::new(&["a", "b", "c"]);
        let mut host = HeadlessHost::new(glam::UVec2::new(800, 600));
        let mut library = dir.library().with_cache_capacity(2);
        let none = Defines::new();

        library.load(&mut host, "a", &none).unwrap();
        library.load(&mut host, "b", &none).unwrap();
        // touch "a" so "b" becomes the oldest entry
        library.load(&mut host, "a", &none).unwrap();
        library.load(&mut host, "c", &none).unwrap();
        assert_eq!(library.cached_programs(), 2);
        assert_eq!(host.compile_count(), 3);

        library.load(&mut host, "a", &none).unwrap();
        assert_eq!(host.compile_count(), 3);
        library.load(&mut host, "b", &none).unwrap();
        assert_eq!(host.compile_count(), 4);
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = ShaderDir::new(&[]);
        let mut host = HeadlessHost::new(glam::UVec2::new(800, 600));
        let mut library = dir.library();
        let err = library.load(&mut host, "nope", &Defines::new()).unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Shader(ShaderError::MissingSource(_))
        ));
    }

    #[test]
    fn modified_sources_are_evicted() {
        let dir = ShaderDir::new(&["fog"]);
        let mut host = HeadlessHost::new(glam::UVec2::new(800, 600));
        let mut library = dir.library();
        library.load(&mut host, "fog", &Defines::new()).unwrap();
        assert!(library.check_modified().is_empty());

        dir.touch("fog", "// edited\n");
        let changed = library.check_modified();
        assert_eq!(changed.len(), 1);
        assert!(library.uses_any("fog", &changed));
        assert_eq!(library.cached_programs(), 0);
    }
}
