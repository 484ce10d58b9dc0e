//! Coupled model assembly.
//!
//! A [`Coupled`] container groups atomic models and nested coupled models
//! together with their port couplings. The kernel itself only executes atomic
//! models: before a simulation starts, every coupled container is flattened
//! into its atomic leaves and a set of direct output-port to input-port
//! routes, resolving chains that pass through coupled boundary ports.
//!
//! Children are addressed by name; flattening qualifies the names of models
//! nested in sub-containers with the container name (`"net.queue"`).

use std::collections::HashMap;

use crate::model::AtomicModel;
use crate::simulation::ConfigError;

/// A container of models and their couplings.
pub struct Coupled {
    name: String,
    atomics: Vec<Box<dyn AtomicModel>>,
    coupleds: Vec<Coupled>,
    internal: Vec<(String, u16, String, u16)>,
    inputs: Vec<(u16, String, u16)>,
    outputs: Vec<(String, u16, u16)>,
}

impl Coupled {
    /// Creates an empty container.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            atomics: Vec::new(),
            coupleds: Vec::new(),
            internal: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// The container name, used to qualify the names of nested models.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an atomic child.
    pub fn add_atomic(&mut self, model: Box<dyn AtomicModel>) -> &mut Self {
        self.atomics.push(model);
        self
    }

    /// Adds a nested coupled child.
    pub fn add_coupled(&mut self, coupled: Coupled) -> &mut Self {
        self.coupleds.push(coupled);
        self
    }

    /// Couples an output port of one child to an input port of another.
    pub fn connect(
        &mut self,
        src: impl Into<String>,
        src_port: u16,
        dst: impl Into<String>,
        dst_port: u16,
    ) -> &mut Self {
        self.internal
            .push((src.into(), src_port, dst.into(), dst_port));
        self
    }

    /// Couples an input port of this container to an input port of a child.
    pub fn connect_input(
        &mut self,
        own_port: u16,
        dst: impl Into<String>,
        dst_port: u16,
    ) -> &mut Self {
        self.inputs.push((own_port, dst.into(), dst_port));
        self
    }

    /// Couples an output port of a child to an output port of this container.
    pub fn connect_output(
        &mut self,
        src: impl Into<String>,
        src_port: u16,
        own_port: u16,
    ) -> &mut Self {
        self.outputs.push((src.into(), src_port, own_port));
        self
    }

    /// Flattens the container into atomic leaves and direct routes.
    ///
    /// Names in the result are relative to this container; the caller
    /// prefixes them as appropriate.
    pub(crate) fn flatten(self) -> Result<Flattened, ConfigError> {
        let container = self.name.clone();

        enum Child {
            Atomic,
            Coupled(Flattened),
        }

        let mut out = Flattened::default();
        let mut children: HashMap<String, Child> = HashMap::new();

        for model in self.atomics {
            let name = model.name().to_string();
            if children.contains_key(&name) {
                return Err(ConfigError::DuplicateModel(qualify(&container, &name)));
            }
            children.insert(name.clone(), Child::Atomic);
            out.atomics.push((name, model));
        }

        for sub in self.coupleds {
            let sub_name = sub.name.clone();
            if children.contains_key(&sub_name) {
                return Err(ConfigError::DuplicateModel(qualify(&container, &sub_name)));
            }
            let mut flat = sub.flatten()?;
            // Qualify the nested names with the sub-container name.
            for (name, _) in &mut flat.atomics {
                *name = qualify(&sub_name, name);
            }
            for ((s, _), (d, _)) in &mut flat.routes {
                *s = qualify(&sub_name, s);
                *d = qualify(&sub_name, d);
            }
            for targets in flat.input_targets.values_mut() {
                for (name, _) in targets {
                    *name = qualify(&sub_name, name);
                }
            }
            flat.output_sources = flat
                .output_sources
                .into_iter()
                .map(|((name, port), outs)| ((qualify(&sub_name, &name), port), outs))
                .collect();

            out.atomics.append(&mut flat.atomics);
            out.routes.append(&mut flat.routes);
            children.insert(sub_name, Child::Coupled(flat));
        }

        let resolve_dst = |children: &HashMap<String, Child>,
                           child: &str,
                           port: u16|
         -> Result<Vec<(String, u16)>, ConfigError> {
            match children.get(child) {
                Some(Child::Atomic) => Ok(vec![(child.to_string(), port)]),
                Some(Child::Coupled(flat)) => Ok(flat
                    .input_targets
                    .get(&port)
                    .cloned()
                    .unwrap_or_default()),
                None => Err(ConfigError::UnknownModel(qualify(&container, child))),
            }
        };
        let resolve_src = |children: &HashMap<String, Child>,
                           child: &str,
                           port: u16|
         -> Result<Vec<(String, u16)>, ConfigError> {
            match children.get(child) {
                Some(Child::Atomic) => Ok(vec![(child.to_string(), port)]),
                Some(Child::Coupled(flat)) => Ok(flat
                    .output_sources
                    .iter()
                    .filter(|(_, outs)| outs.contains(&port))
                    .map(|((name, p), _)| (name.clone(), *p))
                    .collect()),
                None => Err(ConfigError::UnknownModel(qualify(&container, child))),
            }
        };

        for (src, src_port, dst, dst_port) in &self.internal {
            let sources = resolve_src(&children, src, *src_port)?;
            let targets = resolve_dst(&children, dst, *dst_port)?;
            for s in &sources {
                for d in &targets {
                    out.routes.push((s.clone(), d.clone()));
                }
            }
        }

        for (own_port, dst, dst_port) in &self.inputs {
            let targets = resolve_dst(&children, dst, *dst_port)?;
            out.input_targets
                .entry(*own_port)
                .or_default()
                .extend(targets);
        }

        for (src, src_port, own_port) in &self.outputs {
            for s in resolve_src(&children, src, *src_port)? {
                out.output_sources.entry(s).or_default().push(*own_port);
            }
        }

        Ok(out)
    }
}

impl std::fmt::Debug for Coupled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coupled")
            .field("name", &self.name)
            .field("atomics", &self.atomics.len())
            .field("coupleds", &self.coupleds.len())
            .finish_non_exhaustive()
    }
}

fn qualify(container: &str, name: &str) -> String {
    format!("{container}.{name}")
}

/// The flattening of a [`Coupled`] container.
#[derive(Default)]
pub(crate) struct Flattened {
    /// Atomic leaves with names relative to the flattened container.
    pub(crate) atomics: Vec<(String, Box<dyn AtomicModel>)>,
    /// Fully resolved atomic-to-atomic routes.
    pub(crate) routes: Vec<((String, u16), (String, u16))>,
    /// Container input port to atomic input ports.
    pub(crate) input_targets: HashMap<u16, Vec<(String, u16)>>,
    /// Atomic output port to container output ports.
    pub(crate) output_sources: HashMap<(String, u16), Vec<u16>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{MessageBag, OutputBag};
    use crate::time::VirtualTime;

    #[derive(Clone)]
    struct Leaf(String);

    impl AtomicModel for Leaf {
        fn name(&self) -> &str {
            &self.0
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn time_advance(&self) -> VirtualTime {
            VirtualTime::INFINITY
        }
        fn internal_transition(&mut self) {}
        fn external_transition(&mut self, _: VirtualTime, _: &MessageBag) {}
        fn confluent_transition(&mut self, _: &MessageBag) {}
        fn output(&mut self, _: &mut OutputBag) {}
    }

    fn leaf(name: &str) -> Box<dyn AtomicModel> {
        Box::new(Leaf(name.to_string()))
    }

    #[test]
    fn flat_coupling_resolves_directly() {
        let mut c = Coupled::new("pair");
        c.add_atomic(leaf("a"));
        c.add_atomic(leaf("b"));
        c.connect("a", 0, "b", 1);

        let flat = c.flatten().unwrap();
        assert_eq!(flat.atomics.len(), 2);
        assert_eq!(
            flat.routes,
            vec![(("a".to_string(), 0), ("b".to_string(), 1))]
        );
    }

    #[test]
    fn boundary_chains_collapse_to_direct_routes() {
        // outer: src -> inner.in0; inner: in0 -> sink, sink out1 -> out2;
        // outer: inner.out2 -> dst.
        let mut inner = Coupled::new("inner");
        inner.add_atomic(leaf("sink"));
        inner.connect_input(0, "sink", 3);
        inner.connect_output("sink", 1, 2);

        let mut outer = Coupled::new("outer");
        outer.add_atomic(leaf("src"));
        outer.add_atomic(leaf("dst"));
        outer.add_coupled(inner);
        outer.connect("src", 0, "inner", 0);
        outer.connect("inner", 2, "dst", 0);

        let flat = outer.flatten().unwrap();
        let names: Vec<_> = flat.atomics.iter().map(|(n, _)| n.clone()).collect();
        assert!(names.contains(&"inner.sink".to_string()));
        assert!(flat
            .routes
            .contains(&(("src".to_string(), 0), ("inner.sink".to_string(), 3))));
        assert!(flat
            .routes
            .contains(&(("inner.sink".to_string(), 1), ("dst".to_string(), 0))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut c = Coupled::new("dup");
        c.add_atomic(leaf("x"));
        c.add_atomic(leaf("x"));
        assert!(matches!(
            c.flatten(),
            Err(ConfigError::DuplicateModel(name)) if name == "dup.x"
        ));
    }
}
