use crate::binding::{resolve_chip, ResolvedChip};
use crate::definition::ChipDefinition;
use crate::error::{ErrorKind, SimError};
use crate::gates::Primitive;
use crate::resolver::Plan;
use rust_embed::RustEmbed;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(RustEmbed)]
#[folder = "resources/chips"]
struct ChipAsset;

/// Source of chip definitions in JSON form, looked up by chip name.
pub trait ChipProvider {
    fn get_definition(&self, name: &str) -> Result<String, std::io::Error>;
    fn get_path(&self, name: &str) -> PathBuf;
}

/// The standard chips compiled into the crate.
pub struct EmbedReader;

impl ChipProvider for EmbedReader {
    fn get_definition(&self, name: &str) -> Result<String, std::io::Error> {
        let path = self.get_path(name);
        let file_name = path.to_str().unwrap_or_default();
        match ChipAsset::get(file_name) {
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Unable to get definition for {}", name),
            )),
            Some(asset) => String::from_utf8(asset.data.into_owned())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }

    fn get_path(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("{}.json", name))
    }
}

/// Reads `<name>.json` from a directory.
#[derive(Clone)]
pub struct FileReader {
    base_path: PathBuf,
}

impl FileReader {
    pub fn new(base_path: &Path) -> FileReader {
        FileReader {
            base_path: base_path.to_path_buf(),
        }
    }
}

impl ChipProvider for FileReader {
    fn get_definition(&self, name: &str) -> Result<String, std::io::Error> {
        fs::read_to_string(self.get_path(name))
    }

    fn get_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", name))
    }
}

/// What a part's chip name refers to.
#[derive(Clone, Debug)]
pub enum ChipType {
    Primitive(Primitive),
    Composite(Rc<ChipDefinition>),
}

/// Registry of chip definitions.
///
/// Definitions are immutable once added and shared between every chip that
/// uses them. Names missing from the registry are loaded lazily from the
/// providers, newest provider first. Resolved bindings and evaluation plans
/// are computed once per chip and cached.
pub struct ChipLibrary {
    definitions: RefCell<HashMap<String, Rc<ChipDefinition>>>,
    providers: Vec<Rc<dyn ChipProvider>>,
    resolved: RefCell<HashMap<String, Rc<ResolvedChip>>>,
    plans: RefCell<HashMap<String, Rc<Plan>>>,
    // Chips whose bindings are being resolved, outermost first.
    resolving: RefCell<Vec<String>>,
}

impl Default for ChipLibrary {
    fn default() -> Self {
        ChipLibrary::new()
    }
}

impl ChipLibrary {
    /// A library holding only the primitive gates.
    pub fn new() -> ChipLibrary {
        ChipLibrary {
            definitions: RefCell::new(HashMap::new()),
            providers: Vec::new(),
            resolved: RefCell::new(HashMap::new()),
            plans: RefCell::new(HashMap::new()),
            resolving: RefCell::new(Vec::new()),
        }
    }

    /// Primitives plus the compiled-in chips (RAM8, RAM64, RAM512, PC).
    pub fn standard() -> ChipLibrary {
        ChipLibrary::new().with_provider(Rc::new(EmbedReader))
    }

    pub fn with_provider(mut self, provider: Rc<dyn ChipProvider>) -> ChipLibrary {
        self.providers.insert(0, provider);
        self
    }

    pub fn add(&self, definition: ChipDefinition) -> Result<Rc<ChipDefinition>, SimError> {
        if Primitive::from_name(&definition.name).is_some() {
            return Err(SimError::configuration(format!(
                "Chip {} would shadow the primitive of the same name.",
                definition.name
            )));
        }
        let mut definitions = self.definitions.borrow_mut();
        if definitions.contains_key(&definition.name) {
            return Err(SimError::configuration(format!(
                "Chip {} is already defined.",
                definition.name
            )));
        }
        let definition = Rc::new(definition);
        definitions.insert(definition.name.clone(), Rc::clone(&definition));
        Ok(definition)
    }

    /// Looks up what a part's chip name refers to.
    pub fn lookup(&self, name: &str) -> Result<ChipType, SimError> {
        if let Some(p) = Primitive::from_name(name) {
            return Ok(ChipType::Primitive(p));
        }
        Ok(ChipType::Composite(self.definition(name)?))
    }

    pub fn definition(&self, name: &str) -> Result<Rc<ChipDefinition>, SimError> {
        if let Some(d) = self.definitions.borrow().get(name) {
            return Ok(Rc::clone(d));
        }

        for provider in &self.providers {
            let text = match provider.get_definition(name) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SimError {
                        msg: format!(
                            "Unable to read {}: {}",
                            provider.get_path(name).display(),
                            e
                        ),
                        kind: ErrorKind::IOError,
                    })
                }
            };
            let definition = ChipDefinition::from_json(&text).map_err(|e| {
                SimError::configuration(format!(
                    "{}: {}",
                    provider.get_path(name).display(),
                    e.msg
                ))
            })?;
            if definition.name != name {
                return Err(SimError::configuration(format!(
                    "{} defines chip {} instead of {}.",
                    provider.get_path(name).display(),
                    definition.name,
                    name
                )));
            }
            tracing::debug!(chip = name, path = %provider.get_path(name).display(), "loaded chip definition");
            return self.add(definition);
        }

        Err(SimError::unresolved(format!("Unknown chip type {}.", name)))
    }

    /// Resolves the bindings of a composite chip, once.
    pub fn resolve(&self, name: &str) -> Result<Rc<ResolvedChip>, SimError> {
        if let Some(r) = self.resolved.borrow().get(name) {
            return Ok(Rc::clone(r));
        }

        if self.resolving.borrow().iter().any(|n| n == name) {
            let mut chain = self.resolving.borrow().clone();
            chain.push(String::from(name));
            return Err(SimError::configuration(format!(
                "Chip {} includes itself: {}.",
                name,
                chain.join(" -> ")
            )));
        }

        let definition = match self.lookup(name)? {
            ChipType::Composite(d) => d,
            ChipType::Primitive(p) => {
                return Err(SimError::configuration(format!(
                    "{} is a primitive and has no bindings to resolve.",
                    p
                )))
            }
        };

        self.resolving.borrow_mut().push(String::from(name));
        let resolved = resolve_chip(&definition, self);
        self.resolving.borrow_mut().pop();

        let resolved = Rc::new(resolved?);
        self.resolved
            .borrow_mut()
            .insert(String::from(name), Rc::clone(&resolved));
        Ok(resolved)
    }

    /// The flattened evaluation plan of a chip, shared by all its instances.
    pub fn plan(&self, name: &str) -> Result<Rc<Plan>, SimError> {
        if let Some(p) = self.plans.borrow().get(name) {
            return Ok(Rc::clone(p));
        }

        let plan = match self.lookup(name)? {
            ChipType::Primitive(p) => Plan::for_primitive(p)?,
            ChipType::Composite(_) => {
                let resolved = self.resolve(name)?;
                Plan::build(&resolved)?
            }
        };
        tracing::debug!(chip = name, "{}", plan);

        let plan = Rc::new(plan);
        self.plans
            .borrow_mut()
            .insert(String::from(name), Rc::clone(&plan));
        Ok(plan)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_lookup_primitive_and_standard() {
        let library = ChipLibrary::standard();
        assert!(matches!(
            library.lookup("Register"),
            Ok(ChipType::Primitive(Primitive::Register))
        ));
        for name in ["RAM8", "RAM64", "RAM512", "PC"] {
            match library.lookup(name) {
                Ok(ChipType::Composite(d)) => assert_eq!(d.name, name),
                other => panic!("{} did not load: {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_unknown_chip() {
        let library = ChipLibrary::standard();
        let e = library.lookup("Frobnicator").unwrap_err();
        assert_eq!(e.kind, ErrorKind::UnresolvedReference);
        assert_eq!(
            ChipLibrary::new().lookup("PC").unwrap_err().kind,
            ErrorKind::UnresolvedReference
        );
    }

    #[test]
    fn test_add_rejects_shadowing_and_duplicates() {
        let library = ChipLibrary::new();
        let e = library.add(ChipDefinition::new("Mux16")).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Configuration);

        library.add(ChipDefinition::new("Thing")).unwrap();
        let e = library.add(ChipDefinition::new("Thing")).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_file_reader() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("Buffer.json")).unwrap();
        write!(
            file,
            r#"{{"name": "Buffer", "inputs": [{{"name": "in"}}], "outputs": [{{"name": "out"}}], "assignments": ["out=in"]}}"#
        )
        .unwrap();
        fs::write(dir.path().join("Wrong.json"), r#"{"name": "Other"}"#).unwrap();

        let library = ChipLibrary::standard().with_provider(Rc::new(FileReader::new(dir.path())));
        assert!(matches!(library.lookup("Buffer"), Ok(ChipType::Composite(_))));
        // The embedded chips are still reachable behind the directory.
        assert!(matches!(library.lookup("PC"), Ok(ChipType::Composite(_))));
        assert_eq!(
            library.lookup("Wrong").unwrap_err().kind,
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_self_inclusion() {
        let library = ChipLibrary::new();
        library
            .add(
                ChipDefinition::new("Loop")
                    .input("in", 1)
                    .output("out", 1)
                    .part("Loop", &["in=in", "out=out"])
                    .unwrap(),
            )
            .unwrap();
        let e = library.resolve("Loop").unwrap_err();
        assert_eq!(e.kind, ErrorKind::Configuration);
        assert!(e.msg.contains("includes itself"));
    }

    #[test]
    fn test_plans_are_shared() {
        let library = ChipLibrary::standard();
        let a = library.plan("PC").unwrap();
        let b = library.plan("PC").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }
}
