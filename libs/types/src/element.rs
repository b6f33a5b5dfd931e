//! Well-known element names.
//!
//! Element entries inside login and directory containers are identified by
//! exact byte-content match against this table. Decoders skip entries whose
//! name is not listed here, so newer peers can add elements without breaking
//! older readers.

pub mod names {
    pub const APPLICATION_ID: &[u8] = b"ApplicationId";
    pub const APPLICATION_NAME: &[u8] = b"ApplicationName";
    pub const POSITION: &[u8] = b"Position";
    pub const PASSWORD: &[u8] = b"Password";
    pub const PROVIDE_PERM_PROFILE: &[u8] = b"ProvidePermissionProfile";
    pub const PROVIDE_PERM_EXPRESSIONS: &[u8] = b"ProvidePermissionExpressions";
    pub const SINGLE_OPEN: &[u8] = b"SingleOpen";
    pub const ALLOW_SUSPECT_DATA: &[u8] = b"AllowSuspectData";
    pub const INSTANCE_ID: &[u8] = b"InstanceId";
    pub const ROLE: &[u8] = b"Role";
    pub const DOWNLOAD_CONNECTION_CONFIG: &[u8] = b"DownloadConnectionConfig";

    pub const SUPPORT_POST: &[u8] = b"SupportOMMPost";
    pub const SUPPORT_BATCH: &[u8] = b"SupportBatchRequests";
    pub const SUPPORT_VIEW: &[u8] = b"SupportViewRequests";
    pub const SUPPORT_STANDBY: &[u8] = b"SupportStandby";
    pub const SUPPORT_OPT_PAUSE: &[u8] = b"SupportOptimizedPauseResume";
    pub const SUPPORT_PROVIDER_DICT_DOWNLOAD: &[u8] = b"SupportProviderDictionaryDownload";

    pub const CONNECTION_CONFIG: &[u8] = b"ConnectionConfig";
    pub const NUM_STANDBY_SERVERS: &[u8] = b"NumStandbyServers";
    pub const HOSTNAME: &[u8] = b"Hostname";
    pub const PORT: &[u8] = b"Port";
    pub const LOAD_FACTOR: &[u8] = b"LoadFactor";
    pub const SERVER_TYPE: &[u8] = b"ServerType";

    // Round-trip latency monitoring
    pub const ROUND_TRIP_LATENCY: &[u8] = b"RoundTripLatency";
    pub const TICKS: &[u8] = b"Ticks";
    pub const TCP_RETRANS: &[u8] = b"TcpRetrans";

    // Warm standby / connection status
    pub const WARM_STANDBY_MODE: &[u8] = b"WarmStandbyMode";

    // Directory
    pub const SERVICE_NAME: &[u8] = b"Name";
    pub const SERVICE_VENDOR: &[u8] = b"Vendor";
    pub const SERVICE_IS_SOURCE: &[u8] = b"IsSource";
    pub const SERVICE_STATE: &[u8] = b"ServiceState";
    pub const ACCEPTING_REQUESTS: &[u8] = b"AcceptingRequests";
    pub const QOS: &[u8] = b"QoS";

    // Dictionary
    pub const DICTIONARY_ID: &[u8] = b"DictionaryId";
    pub const DICTIONARY_TYPE: &[u8] = b"Type";
    pub const DICTIONARY_VERSION: &[u8] = b"Version";
}
