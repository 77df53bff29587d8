//! Column resolver
//!
//! Maps variant header names onto canonical transcript fields through an
//! explicit, versioned alias table. Lookups are case- and whitespace-insensitive
//! on the header side; aliases are stored already normalized.

use crate::models::{CellValue, RawRow};

/// Canonical transcript fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Nim,
    StudentName,
    CourseCode,
    CourseName,
    Credits,
    GradeLetter,
    Semester,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 7] = [
        CanonicalField::Nim,
        CanonicalField::StudentName,
        CanonicalField::CourseCode,
        CanonicalField::CourseName,
        CanonicalField::Credits,
        CanonicalField::GradeLetter,
        CanonicalField::Semester,
    ];

    /// Upper-case name used in skip reasons
    pub fn label(&self) -> &'static str {
        match self {
            CanonicalField::Nim => "NIM",
            CanonicalField::StudentName => "NAMA",
            CanonicalField::CourseCode => "KODE_MK",
            CanonicalField::CourseName => "NAMA_MK",
            CanonicalField::Credits => "SKS",
            CanonicalField::GradeLetter => "NILAI_HURUF",
            CanonicalField::Semester => "SEMESTER",
        }
    }
}

/// Canonical field → ordered alias list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTable {
    version: u32,
    entries: Vec<(CanonicalField, Vec<String>)>,
}

impl ColumnTable {
    /// Aliases seen in registrar exports
    pub fn v1() -> Self {
        let entries = vec![
            (CanonicalField::Nim, vec!["nim", "no. ind. mhs.", "no_ind_mhs"]),
            (
                CanonicalField::StudentName,
                vec!["nama", "nama mahasiswa", "nama_mahasiswa"],
            ),
            (
                CanonicalField::CourseCode,
                vec!["kode_mk", "kode mk", "kode", "kode_mata_kuliah"],
            ),
            (
                CanonicalField::CourseName,
                vec!["nama_mk", "nama mata kuliah", "matakuliah", "mata_kuliah"],
            ),
            (CanonicalField::Credits, vec!["sks", "sks mk", "kredit", "sks_mk"]),
            (
                CanonicalField::GradeLetter,
                vec!["nilai_huruf", "nilai", "grade", "huruf"],
            ),
            (
                CanonicalField::Semester,
                vec!["semester", "smt", "semester_ambil"],
            ),
        ];

        Self {
            version: 1,
            entries: entries
                .into_iter()
                .map(|(field, aliases)| {
                    (field, aliases.into_iter().map(str::to_string).collect())
                })
                .collect(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Append an alias at the lowest priority; bumps the table version
    pub fn with_alias(mut self, field: CanonicalField, alias: &str) -> Self {
        let alias = normalize_header(alias);
        if let Some((_, aliases)) = self.entries.iter_mut().find(|(f, _)| *f == field) {
            if !aliases.contains(&alias) {
                aliases.push(alias);
                self.version += 1;
            }
        } else {
            self.entries.push((field, vec![alias]));
            self.version += 1;
        }
        self
    }

    pub fn aliases(&self, field: CanonicalField) -> &[String] {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, aliases)| aliases.as_slice())
            .unwrap_or(&[])
    }

    /// First matching raw value among the field's aliases, `None` when no alias
    /// matches. Works on raw or already-normalized headers.
    pub fn resolve<'r>(&self, row: &'r RawRow, field: CanonicalField) -> Option<&'r CellValue> {
        self.aliases(field).iter().find_map(|alias| {
            row.iter()
                .find(|(header, _)| normalize_header(header) == *alias)
                .map(|(_, value)| value)
        })
    }
}

impl Default for ColumnTable {
    fn default() -> Self {
        Self::v1()
    }
}

/// Trim + lowercase
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}
