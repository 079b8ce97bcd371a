/// Dataset Catalog
///
/// The ten tables published in each release. A dataset knows its target table and columns,
/// how its archives are named on the server, and which keywords identify its extracted files.
///
/// How the archives of a dataset are named in the remote listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveRule {
    /// A single archive, matched by exact (case-insensitive) file name.
    Exact(&'static str),
    /// Sharded archives named `<prefix><n>.zip`.
    Numbered(&'static str),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Dataset {
    /// Table name, also used in cursor keys
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub archive: ArchiveRule,
    /// Upper-case substrings that identify an extracted file of this dataset
    pub keywords: &'static [&'static str],
    /// Whether the table gets a `cnpj_basico` index when indexes are enabled
    pub indexed: bool,
}

const CODE_DESCRIPTION: &[&str] = &["codigo", "descricao"];

/// Every known dataset, in file classification order.
pub static CATALOG: [Dataset; 10] = [
    Dataset {
        name: "empresa",
        columns: &[
            "cnpj_basico",
            "razao_social",
            "natureza_juridica",
            "qualificacao_responsavel",
            "capital_social",
            "porte_empresa",
            "ente_federativo_responsavel",
        ],
        archive: ArchiveRule::Numbered("Empresas"),
        keywords: &["EMPRE"],
        indexed: true,
    },
    Dataset {
        name: "estabelecimento",
        columns: &[
            "cnpj_basico",
            "cnpj_ordem",
            "cnpj_dv",
            "identificador_matriz_filial",
            "nome_fantasia",
            "situacao_cadastral",
            "data_situacao_cadastral",
            "motivo_situacao_cadastral",
            "nome_cidade_exterior",
            "pais",
            "data_inicio_atividade",
            "cnae_fiscal_principal",
            "cnae_fiscal_secundaria",
            "tipo_logradouro",
            "logradouro",
            "numero",
            "complemento",
            "bairro",
            "cep",
            "uf",
            "municipio",
            "ddd_1",
            "telefone_1",
            "ddd_2",
            "telefone_2",
            "ddd_fax",
            "fax",
            "correio_eletronico",
            "situacao_especial",
            "data_situacao_especial",
        ],
        archive: ArchiveRule::Numbered("Estabelecimentos"),
        keywords: &["ESTABELE"],
        indexed: true,
    },
    Dataset {
        name: "socios",
        columns: &[
            "cnpj_basico",
            "identificador_socio",
            "nome_socio_razao_social",
            "cpf_cnpj_socio",
            "qualificacao_socio",
            "data_entrada_sociedade",
            "pais",
            "representante_legal",
            "nome_do_representante",
            "qualificacao_representante_legal",
            "faixa_etaria",
        ],
        archive: ArchiveRule::Numbered("Socios"),
        keywords: &["SOCIO"],
        indexed: true,
    },
    Dataset {
        name: "simples",
        columns: &[
            "cnpj_basico",
            "opcao_pelo_simples",
            "data_opcao_simples",
            "data_exclusao_simples",
            "opcao_mei",
            "data_opcao_mei",
            "data_exclusao_mei",
        ],
        archive: ArchiveRule::Exact("simples.zip"),
        keywords: &["SIMPLES"],
        indexed: true,
    },
    Dataset {
        name: "cnae",
        columns: CODE_DESCRIPTION,
        archive: ArchiveRule::Exact("cnaes.zip"),
        keywords: &["CNAE"],
        indexed: false,
    },
    Dataset {
        name: "moti",
        columns: CODE_DESCRIPTION,
        archive: ArchiveRule::Exact("motivos.zip"),
        keywords: &["MOTI", "MOTIVO"],
        indexed: false,
    },
    Dataset {
        name: "munic",
        columns: CODE_DESCRIPTION,
        archive: ArchiveRule::Exact("municipios.zip"),
        keywords: &["MUNIC"],
        indexed: false,
    },
    Dataset {
        name: "natju",
        columns: CODE_DESCRIPTION,
        archive: ArchiveRule::Exact("naturezas.zip"),
        keywords: &["NATJU", "NATURE"],
        indexed: false,
    },
    Dataset {
        name: "pais",
        columns: CODE_DESCRIPTION,
        archive: ArchiveRule::Exact("paises.zip"),
        keywords: &["PAIS"],
        indexed: false,
    },
    Dataset {
        name: "quals",
        columns: CODE_DESCRIPTION,
        archive: ArchiveRule::Exact("qualificacoes.zip"),
        keywords: &["QUAL"],
        indexed: false,
    },
];

/// Datasets loaded when nothing else is configured.
pub const DEFAULT_ENABLED: &[&str] = &["simples", "moti", "quals"];

/// Look up a dataset by table name (case-insensitive).
pub fn find(name: &str) -> Option<&'static Dataset> {
    let name = name.trim();
    CATALOG.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}
