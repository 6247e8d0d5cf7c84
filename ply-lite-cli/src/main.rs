//! Command line tools for PLY files: dump headers in canonical form, and
//! measure how fast files load as triangle meshes.

use std::time::Instant;

use failure::{bail, format_err, Error};
use structopt::StructOpt;

use ply_lite::Reader;


#[derive(StructOpt, Debug)]
#[structopt(name = "ply-lite", about = "Inspect and benchmark PLY files.")]
enum Command {
    /// Print each file's header in canonical form.
    #[structopt(name = "header-dump")]
    HeaderDump {
        /// The PLY files to inspect.
        files: Vec<String>,
    },

    /// Load each file as a triangle mesh and report the elapsed time.
    #[structopt(name = "perf")]
    Perf {
        /// Rewrite the face element's `vertex_indices` list into fixed-size
        /// columns before loading, enabling the block read path. Only valid
        /// if every face really is a triangle.
        #[structopt(long = "assume-triangles")]
        assume_triangles: bool,

        /// The PLY files to load.
        files: Vec<String>,
    },
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, Error> {
    match Command::from_args() {
        Command::HeaderDump { files } => header_dump_all(&files),
        Command::Perf { assume_triangles, files } => perf_all(&files, assume_triangles),
    }
}


// ===========================================================================
// ===== `header-dump`
// ===========================================================================

fn header_dump_all(files: &[String]) -> Result<bool, Error> {
    if files.is_empty() {
        bail!("no input files provided");
    }

    let mut all_ok = true;
    for (i, file) in files.iter().enumerate() {
        if files.len() > 1 {
            if i > 0 {
                println!();
            }
            println!("---- {} ----", file);
        }
        if let Err(e) = header_dump(file) {
            eprintln!("{}: {}", file, e);
            all_ok = false;
        }
    }
    Ok(all_ok)
}

fn header_dump(file: &str) -> Result<(), Error> {
    let reader = Reader::open(file)?;

    println!("ply");
    println!(
        "format {} {}.{}",
        reader.encoding(),
        reader.version_major(),
        reader.version_minor(),
    );
    for elem in reader.elements() {
        println!("element {} {}", elem.name, elem.count);
        for prop in &elem.properties {
            match prop.count_type {
                Some(count_type) => {
                    println!("property list {} {} {}", count_type, prop.ty, prop.name)
                }
                None => println!("property {} {}", prop.ty, prop.name),
            }
        }
    }
    println!("end_header");
    Ok(())
}


// ===========================================================================
// ===== `perf`
// ===========================================================================

/// What `perf` populates for each file: a plain triangle mesh, with any
/// non-triangle faces ear clipped during extraction.
struct TriMesh {
    positions: Vec<f32>,
    normals: Option<Vec<f32>>,
    uvs: Option<Vec<f32>>,
    indices: Vec<i32>,
}

fn perf_all(files: &[String], assume_triangles: bool) -> Result<bool, Error> {
    if files.is_empty() {
        bail!("no input files provided");
    }

    let width = files.iter().map(|f| f.len()).max().unwrap_or(0);
    let overall = Instant::now();
    let mut num_failed = 0;

    for file in files {
        let start = Instant::now();
        let result = load_trimesh(file, assume_triangles);
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(mesh) => {
                let extras = match (&mesh.normals, &mesh.uvs) {
                    (Some(_), Some(_)) => " + normals + uvs",
                    (Some(_), None) => " + normals",
                    (None, Some(_)) => " + uvs",
                    (None, None) => "",
                };
                println!(
                    "{:<width$}  passed  {:8.3} ms  ({} verts, {} tris{})",
                    file,
                    ms,
                    mesh.positions.len() / 3,
                    mesh.indices.len() / 3,
                    extras,
                    width = width,
                );
            }
            Err(e) => {
                println!(
                    "{:<width$}  FAILED  {:8.3} ms  ({})",
                    file,
                    ms,
                    e,
                    width = width,
                );
                num_failed += 1;
            }
        }
    }

    println!("----");
    println!("{:.3} ms total", overall.elapsed().as_secs_f64() * 1000.0);
    println!("{} passed", files.len() - num_failed);
    println!("{} failed", num_failed);
    Ok(num_failed == 0)
}

fn load_trimesh(path: &str, assume_triangles: bool) -> Result<TriMesh, Error> {
    let mut reader = Reader::open(path)?;

    let mut face_columns = None;
    if assume_triangles {
        let face_idx = reader
            .find_element("face")
            .ok_or_else(|| format_err!("no face element"))?;
        let prop = reader
            .get_element(face_idx)
            .and_then(|e| e.find_property("vertex_indices"))
            .ok_or_else(|| format_err!("face element has no vertex_indices"))?;
        face_columns = reader.convert_list_to_fixed_size(face_idx, prop, 3);
        if face_columns.is_none() {
            bail!("vertex_indices cannot be read as fixed-size triangles");
        }
    }

    let mut mesh = TriMesh {
        positions: Vec::new(),
        normals: None,
        uvs: None,
        indices: Vec::new(),
    };
    let mut got_verts = false;
    let mut got_faces = false;

    while reader.has_element() && (!got_verts || !got_faces) {
        if reader.element_is("vertex") {
            reader.load_element()?;
            let count = reader.num_rows() as usize;

            mesh.positions = vec![0.0; count * 3];
            reader.extract_scalar_tuple(&["x", "y", "z"], &mut mesh.positions)?;

            if reader.has_scalar_tuple(&["nx", "ny", "nz"]) {
                let mut normals = vec![0.0; count * 3];
                reader.extract_scalar_tuple(&["nx", "ny", "nz"], &mut normals)?;
                mesh.normals = Some(normals);
            }
            for uv_names in &[["u", "v"], ["s", "t"]] {
                if reader.has_scalar_tuple(uv_names) {
                    let mut uvs = vec![0.0; count * 2];
                    reader.extract_scalar_tuple(uv_names, &mut uvs)?;
                    mesh.uvs = Some(uvs);
                    break;
                }
            }
            got_verts = true;
        } else if !got_faces && reader.element_is("face") {
            reader.load_element()?;
            let count = reader.num_rows() as usize;

            if let Some(cols) = &face_columns {
                mesh.indices = vec![0; count * 3];
                reader.extract_scalar_columns(cols, &mut mesh.indices)?;
            } else {
                let prop = reader
                    .element()
                    .find_property("vertex_indices")
                    .ok_or_else(|| format_err!("face element has no vertex_indices"))?;
                if reader.all_rows_have_n(prop, 3) {
                    mesh.indices = vec![0; count * 3];
                    reader.extract_list_as(prop, &mut mesh.indices)?;
                } else {
                    if !got_verts {
                        bail!("face data needing triangulation found before vertex data");
                    }
                    let num_indices = reader.count_triangles(prop) as usize * 3;
                    mesh.indices = vec![0; num_indices];
                    let num_verts = (mesh.positions.len() / 3) as u32;
                    reader.extract_triangles(prop, &mesh.positions, num_verts, &mut mesh.indices)?;
                }
            }
            got_faces = true;
        }
        reader.next_element()?;
    }

    if !got_verts || !got_faces {
        bail!("not a triangle mesh (missing vertex or face element)");
    }
    let num_verts = (mesh.positions.len() / 3) as i32;
    if mesh.indices.iter().any(|&i| i < 0 || i >= num_verts) {
        bail!("face indices out of range");
    }

    Ok(mesh)
}
